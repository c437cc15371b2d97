//! Two-sided (biorthogonal) Lanczos process.
//!
//! Builds two sequences `{vₖ}` from `A` and `{uₖ}` from `Aᵀ` that are biorthogonal,
//! `⟨uᵢ, vⱼ⟩ = δᵢⱼ`, and satisfy
//!
//! ```text
//! A Vₖ  = Vₖ Tₖ  + βₖ₊₁ vₖ₊₁ eₖᵀ
//! Aᵀ Uₖ = Uₖ Tₖᵀ + γₖ₊₁ uₖ₊₁ eₖᵀ
//! ```
//!
//! with `Tₖ` tridiagonal, diagonal `αₖ`, subdiagonal `βₖ` and superdiagonal `γₖ`.
//! The normalization splits `⟨pₖ, qₖ⟩` as `βₖ₊₁ = √|⟨p, q⟩|` and
//! `γₖ₊₁ = ⟨p, q⟩ / βₖ₊₁`, so the two coefficients agree up to sign.

use crate::{
    error::KrylovError,
    matrix::{BasisSequence, axpy, dot, norm},
};
use faer::{MatRef, Par, dyn_stack::MemStack, matrix_free::BiLinOp, prelude::*};

/// Coefficients produced by one biorthogonal Lanczos step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BiLanczosStep {
    pub alpha: f64,
    /// `βₖ`, the subdiagonal entry left of `αₖ`.
    pub beta: f64,
    /// `γₖ`, the superdiagonal entry above `αₖ`.
    pub gamma: f64,
    pub beta_next: f64,
    pub gamma_next: f64,
    /// `⟨pₖ, qₖ⟩`. Zero means the two-sided process cannot continue.
    pub pq: f64,
}

/// Stateful biorthogonal Lanczos iteration.
#[derive(Debug)]
pub struct BiLanczos<'a, A: ?Sized> {
    operator: &'a A,
    v: BasisSequence,
    u: BasisSequence,
    beta: f64,
    gamma: f64,
    beta_next: f64,
    gamma_next: f64,
    steps: usize,
}

impl<'a, A: ?Sized + BiLinOp<f64>> BiLanczos<'a, A> {
    pub fn new(operator: &'a A) -> Self {
        let n = operator.nrows();
        Self {
            operator,
            v: BasisSequence::new(n, false),
            u: BasisSequence::new(n, false),
            beta: 0.0,
            gamma: 0.0,
            beta_next: 0.0,
            gamma_next: 0.0,
            steps: 0,
        }
    }

    /// Starts the sequences from `v₁ = b/β₁` and `u₁ = c/γ₁`.
    ///
    /// Returns `⟨c, b⟩`. When it is zero nothing is normalized and the caller
    /// must report a breakdown before the first step.
    pub fn start(&mut self, b: MatRef<'_, f64>, c: MatRef<'_, f64>) -> f64 {
        let cb = dot(c, b);
        self.v.seed(b);
        self.u.seed(c);
        if cb != 0.0 {
            let beta = cb.abs().sqrt();
            let gamma = cb / beta;
            self.v.normalize_next(beta);
            self.u.normalize_next(gamma);
            self.beta = beta;
            self.gamma = gamma;
        }
        self.v.advance();
        self.u.advance();
        self.steps = 0;
        cb
    }

    /// Applies `A` to `vₖ` and `Aᵀ` to `uₖ` and forms the next pair.
    pub fn step(&mut self, par: Par, stack: &mut MemStack) -> Result<BiLanczosStep, KrylovError> {
        let k = self.steps + 1;
        let (beta, gamma) = (self.beta, self.gamma);

        let mut q = self.v.views_mut();
        let mut p = self.u.views_mut();
        self.operator.apply(q.next_raw.rb_mut(), q.curr, par, stack);
        self.operator
            .transpose_apply(p.next_raw.rb_mut(), p.curr, par, stack);
        if k >= 2 {
            axpy(-gamma, q.prev_raw, q.next_raw.rb_mut());
            axpy(-beta, p.prev_raw, p.next_raw.rb_mut());
        }

        let alpha = dot(p.curr, q.next_raw.rb());
        axpy(-alpha, q.curr, q.next_raw.rb_mut());
        axpy(-alpha, p.curr, p.next_raw.rb_mut());

        let pq = dot(p.next_raw.rb(), q.next_raw.rb());
        let (beta_next, gamma_next) = if pq != 0.0 {
            let beta_next = pq.abs().sqrt();
            (beta_next, pq / beta_next)
        } else {
            (0.0, 0.0)
        };
        if pq != 0.0 {
            self.v.normalize_next(beta_next);
            self.u.normalize_next(gamma_next);
        }

        self.beta_next = beta_next;
        self.gamma_next = gamma_next;
        self.steps = k;
        Ok(BiLanczosStep {
            alpha,
            beta,
            gamma,
            beta_next,
            gamma_next,
            pq,
        })
    }

    /// `vₖ` of the step just performed.
    #[inline]
    pub fn current_v(&self) -> MatRef<'_, f64> {
        self.v.curr()
    }

    /// `vₖ₊₁` as formed by the last step.
    #[inline]
    pub fn next_v(&self) -> MatRef<'_, f64> {
        self.v.next()
    }

    /// Returns `(⟨vₖ, vₖ₊₁⟩, ‖vₖ₊₁‖)`, used by the residual estimates.
    pub fn next_v_geometry(&self) -> (f64, f64) {
        (dot(self.v.curr(), self.v.next()), norm(self.v.next()))
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
        mat,
        matrix_free::LinOp,
    };

    #[test]
    fn test_orthogonal_start_reports_zero() {
        let a: Mat<f64> = mat![[1.0, 2.0], [0.0, 1.0]];
        let b: Mat<f64> = mat![[1.0], [0.0]];
        let c: Mat<f64> = mat![[0.0], [1.0]];
        let op = a.as_ref();
        let mut lanczos = BiLanczos::new(&op);
        assert_eq!(lanczos.start(b.as_ref(), c.as_ref()), 0.0);
    }

    #[test]
    fn test_sequences_are_biorthogonal() {
        let n = 5;
        let a = Mat::from_fn(n, n, |i, j| {
            if i == j {
                4.0
            } else if j == i + 1 {
                1.0
            } else if i == j + 1 {
                -0.5
            } else {
                0.0
            }
        });
        let b = Mat::from_fn(n, 1, |i, _| 1.0 + i as f64);
        let op = a.as_ref();
        let mut mem = MemBuffer::new(StackReq::any_of(&[
            op.apply_scratch(1, Par::Seq),
            op.transpose_apply_scratch(1, Par::Seq),
        ]));
        let stack = MemStack::new(&mut mem);

        let mut lanczos = BiLanczos::new(&op);
        assert!(lanczos.start(b.as_ref(), b.as_ref()) > 0.0);
        let step = lanczos.step(Par::Seq, stack).unwrap();
        assert!(step.pq != 0.0);
        // ⟨u₁, v₂⟩ = 0 and ⟨u₂, v₁⟩ = 0 after one step.
        let v1 = lanczos.current_v().to_owned();
        let v2 = lanczos.next_v().to_owned();
        let u1 = lanczos.u.curr().to_owned();
        let u2 = lanczos.u.next().to_owned();
        assert!(dot(u1.as_ref(), v2.as_ref()).abs() < 1e-13);
        assert!(dot(u2.as_ref(), v1.as_ref()).abs() < 1e-13);
        assert!((dot(u2.as_ref(), v2.as_ref()) - 1.0).abs() < 1e-13);
        assert!((step.beta_next * step.gamma_next - step.pq).abs() < 1e-13);
    }

    #[test]
    fn test_symmetric_operator_reduces_to_lanczos() {
        let a: Mat<f64> = mat![[2.0, -1.0, 0.0], [-1.0, 2.0, -1.0], [0.0, -1.0, 2.0]];
        let b: Mat<f64> = mat![[1.0], [2.0], [3.0]];
        let op = a.as_ref();
        let mut mem = MemBuffer::new(StackReq::any_of(&[
            op.apply_scratch(1, Par::Seq),
            op.transpose_apply_scratch(1, Par::Seq),
        ]));
        let stack = MemStack::new(&mut mem);

        let mut lanczos = BiLanczos::new(&op);
        lanczos.start(b.as_ref(), b.as_ref());
        for _ in 0..2 {
            let step = lanczos.step(Par::Seq, stack).unwrap();
            assert!((step.beta_next - step.gamma_next).abs() < 1e-13);
            lanczos.advance();
        }
        assert_eq!(lanczos.steps(), 2);
    }
}
