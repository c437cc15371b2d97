//! Saunders–Simon–Yip orthogonal tridiagonalization.
//!
//! Runs two coupled sequences from `b` (range side, preconditioner `M = E⁻¹`) and
//! `c` (domain side, preconditioner `N = F⁻¹`):
//!
//! ```text
//! β₁ E v₁ = b,                 γ₁ F u₁ = c
//! βₖ₊₁ E vₖ₊₁ = A uₖ  - αₖ E vₖ - γₖ E vₖ₋₁
//! γₖ₊₁ F uₖ₊₁ = Aᵀ vₖ - αₖ F uₖ - βₖ F uₖ₋₁
//! ```
//!
//! so that `Vₖᵀ A Uₖ = Tₖ` is tridiagonal with diagonal `αₖ`, subdiagonal `βₖ`
//! and superdiagonal `γₖ`. Interleaving the two sequences turns the augmented
//! system `[τE A; Aᵀ νF]` into a 2x2-block tridiagonal matrix.

use super::breakdown_tolerance;
use crate::{
    error::KrylovError,
    matrix::{BasisSequence, axpy, dot},
};
use faer::{
    MatRef, Par,
    dyn_stack::MemStack,
    matrix_free::{BiLinOp, LinOp},
    prelude::*,
};

/// Coefficients produced by one tridiagonalization step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TridiagonalStep {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub beta_next: f64,
    pub gamma_next: f64,
}

#[derive(Debug)]
pub struct OrthogonalTridiagonalization<'a, A: ?Sized> {
    operator: &'a A,
    range_precond: Option<&'a dyn LinOp<f64>>,
    domain_precond: Option<&'a dyn LinOp<f64>>,
    v: BasisSequence,
    u: BasisSequence,
    beta: f64,
    gamma: f64,
    beta_next: f64,
    gamma_next: f64,
    steps: usize,
}

impl<'a, A: ?Sized + BiLinOp<f64>> OrthogonalTridiagonalization<'a, A> {
    pub fn new(
        operator: &'a A,
        range_precond: Option<&'a dyn LinOp<f64>>,
        domain_precond: Option<&'a dyn LinOp<f64>>,
    ) -> Self {
        Self {
            operator,
            range_precond,
            domain_precond,
            v: BasisSequence::new(operator.nrows(), range_precond.is_some()),
            u: BasisSequence::new(operator.ncols(), domain_precond.is_some()),
            beta: 0.0,
            gamma: 0.0,
            beta_next: 0.0,
            gamma_next: 0.0,
            steps: 0,
        }
    }

    /// Normalizes `b` and `c` and returns `(β₁, γ₁)`. A zero side stays unnormalized.
    pub fn start(
        &mut self,
        b: MatRef<'_, f64>,
        c: MatRef<'_, f64>,
        par: Par,
        stack: &mut MemStack,
    ) -> Result<(f64, f64), KrylovError> {
        self.v.seed(b);
        self.v.precondition_next(self.range_precond, par, stack);
        let beta = self.v.next_norm("M", 0)?;
        self.u.seed(c);
        self.u.precondition_next(self.domain_precond, par, stack);
        let gamma = self.u.next_norm("N", 0)?;

        if beta > 0.0 {
            self.v.normalize_next(beta);
        }
        if gamma > 0.0 {
            self.u.normalize_next(gamma);
        }
        self.v.advance();
        self.u.advance();

        self.beta = beta;
        self.gamma = gamma;
        self.steps = 0;
        Ok((beta, gamma))
    }

    /// Applies `A` to `uₖ` and `Aᵀ` to `vₖ` and forms both next vectors.
    ///
    /// Each side is normalized only when its coefficient exceeds the breakdown tolerance.
    pub fn step(&mut self, par: Par, stack: &mut MemStack) -> Result<TridiagonalStep, KrylovError> {
        let k = self.steps + 1;
        let (beta, gamma) = (self.beta, self.gamma);

        let alpha = {
            let mut q = self.v.views_mut();
            self.operator
                .apply(q.next_raw.rb_mut(), self.u.curr(), par, stack);
            if k >= 2 {
                axpy(-gamma, q.prev_raw, q.next_raw.rb_mut());
            }
            let alpha = dot(q.curr, q.next_raw.rb());
            axpy(-alpha, q.curr_raw, q.next_raw.rb_mut());
            alpha
        };
        {
            let mut p = self.u.views_mut();
            self.operator
                .transpose_apply(p.next_raw.rb_mut(), self.v.curr(), par, stack);
            if k >= 2 {
                axpy(-beta, p.prev_raw, p.next_raw.rb_mut());
            }
            axpy(-alpha, p.curr_raw, p.next_raw.rb_mut());
        }

        self.v.precondition_next(self.range_precond, par, stack);
        self.u.precondition_next(self.domain_precond, par, stack);
        let beta_next = self.v.next_norm("M", k)?;
        let gamma_next = self.u.next_norm("N", k)?;
        let tol = breakdown_tolerance();
        if beta_next > tol {
            self.v.normalize_next(beta_next);
        }
        if gamma_next > tol {
            self.u.normalize_next(gamma_next);
        }

        self.beta_next = beta_next;
        self.gamma_next = gamma_next;
        self.steps = k;
        Ok(TridiagonalStep {
            alpha,
            beta,
            gamma,
            beta_next,
            gamma_next,
        })
    }

    /// `vₖ` of the step just performed.
    #[inline]
    pub fn current_v(&self) -> MatRef<'_, f64> {
        self.v.curr()
    }

    /// `uₖ` of the step just performed.
    #[inline]
    pub fn current_u(&self) -> MatRef<'_, f64> {
        self.u.curr()
    }

    pub fn advance(&mut self) {
        self.v.advance();
        self.u.advance();
        self.beta = self.beta_next;
        self.gamma = self.gamma_next;
    }

    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{
        Mat,
        dyn_stack::{MemBuffer, StackReq},
    };

    #[test]
    fn test_projection_is_tridiagonal() {
        let (m, n) = (5, 4);
        let a = Mat::from_fn(m, n, |i, j| {
            if i == j {
                4.0
            } else {
                ((i + 2 * j) % 3) as f64 - 1.0
            }
        });
        let b = Mat::from_fn(m, 1, |i, _| 1.0 + i as f64);
        let c = Mat::from_fn(n, 1, |i, _| (-1.0f64).powi(i as i32));
        let op = a.as_ref();
        let mut mem = MemBuffer::new(StackReq::any_of(&[
            op.apply_scratch(1, Par::Seq),
            op.transpose_apply_scratch(1, Par::Seq),
        ]));
        let stack = MemStack::new(&mut mem);

        let mut process = OrthogonalTridiagonalization::new(&op, None, None);
        let (beta1, gamma1) = process.start(b.as_ref(), c.as_ref(), Par::Seq, stack).unwrap();
        assert!((beta1 - b.norm_l2()).abs() < 1e-14);
        assert!((gamma1 - c.norm_l2()).abs() < 1e-14);

        let mut vs: Vec<Mat<f64>> = Vec::new();
        let mut us: Vec<Mat<f64>> = Vec::new();
        let mut alphas = Vec::new();
        let mut betas = Vec::new();
        let mut gammas = Vec::new();
        for _ in 0..3 {
            let step = process.step(Par::Seq, stack).unwrap();
            vs.push(process.current_v().to_owned());
            us.push(process.current_u().to_owned());
            alphas.push(step.alpha);
            betas.push(step.beta_next);
            gammas.push(step.gamma_next);
            process.advance();
        }

        for i in 0..3 {
            for j in 0..3 {
                let entry = dot(vs[i].as_ref(), (&a * &us[j]).as_ref());
                let expected = if i == j {
                    alphas[i]
                } else if i == j + 1 {
                    betas[j]
                } else if j == i + 1 {
                    gammas[i]
                } else {
                    0.0
                };
                assert!((entry - expected).abs() < 1e-12, "T[{i}, {j}]");
            }
        }
    }
}
