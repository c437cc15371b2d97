//! Preconditioned Golub–Kahan bidiagonalization.
//!
//! Reduces a rectangular `A` to lower bidiagonal form with two sequences:
//!
//! ```text
//! β₁ E u₁ = b,        α₁ F v₁ = Aᵀ u₁
//! βₖ₊₁ E uₖ₊₁ = A vₖ - αₖ E uₖ
//! αₖ₊₁ F vₖ₊₁ = Aᵀ uₖ₊₁ - βₖ₊₁ F vₖ
//! ```
//!
//! where `M = E⁻¹` acts on the range and `N = F⁻¹` on the domain. The raw
//! sequences hold `E uₖ` and `F vₖ`; the twins hold `uₖ` and `vₖ`.

use crate::{
    error::KrylovError,
    matrix::{BasisSequence, axpy},
};
use faer::{
    MatRef, Par,
    dyn_stack::MemStack,
    matrix_free::{BiLinOp, LinOp},
    prelude::*,
};

/// Coefficients `(βₖ₊₁, αₖ₊₁)` produced by one bidiagonalization step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GolubKahanStep {
    pub beta: f64,
    /// Zero whenever `beta` is zero; the domain vector is then left at zero.
    pub alpha: f64,
}

#[derive(Debug)]
pub struct GolubKahan<'a, A: ?Sized> {
    operator: &'a A,
    range_precond: Option<&'a dyn LinOp<f64>>,
    domain_precond: Option<&'a dyn LinOp<f64>>,
    u: BasisSequence,
    v: BasisSequence,
    alpha: f64,
    steps: usize,
}

impl<'a, A: ?Sized + BiLinOp<f64>> GolubKahan<'a, A> {
    pub fn new(
        operator: &'a A,
        range_precond: Option<&'a dyn LinOp<f64>>,
        domain_precond: Option<&'a dyn LinOp<f64>>,
    ) -> Self {
        Self {
            operator,
            range_precond,
            domain_precond,
            u: BasisSequence::new(operator.nrows(), range_precond.is_some()),
            v: BasisSequence::new(operator.ncols(), domain_precond.is_some()),
            alpha: 0.0,
            steps: 0,
        }
    }

    /// Forms `u₁` and `v₁` from `b` and returns `(β₁, α₁)`.
    ///
    /// When `β₁ = 0` no operator is applied and `α₁` is reported as zero.
    pub fn start(
        &mut self,
        b: MatRef<'_, f64>,
        par: Par,
        stack: &mut MemStack,
    ) -> Result<(f64, f64), KrylovError> {
        self.u.seed(b);
        self.u.precondition_next(self.range_precond, par, stack);
        let beta = self.u.next_norm("M", 0)?;
        if beta == 0.0 {
            return Ok((0.0, 0.0));
        }
        self.u.normalize_next(beta);
        self.u.advance();

        self.operator
            .transpose_apply(self.v.next_raw_mut(), self.u.curr(), par, stack);
        self.v.precondition_next(self.domain_precond, par, stack);
        let alpha = self.v.next_norm("N", 0)?;
        if alpha != 0.0 {
            self.v.normalize_next(alpha);
        }
        self.v.advance();

        self.alpha = alpha;
        self.steps = 0;
        Ok((beta, alpha))
    }

    /// Performs one `A` and one `Aᵀ` application.
    pub fn step(&mut self, par: Par, stack: &mut MemStack) -> Result<GolubKahanStep, KrylovError> {
        let k = self.steps + 1;

        {
            let mut u = self.u.views_mut();
            self.operator
                .apply(u.next_raw.rb_mut(), self.v.curr(), par, stack);
            axpy(-self.alpha, u.curr_raw, u.next_raw.rb_mut());
        }
        self.u.precondition_next(self.range_precond, par, stack);
        let beta = self.u.next_norm("M", k)?;

        let alpha = if beta != 0.0 {
            self.u.normalize_next(beta);
            {
                let mut v = self.v.views_mut();
                self.operator
                    .transpose_apply(v.next_raw.rb_mut(), self.u.next(), par, stack);
                axpy(-beta, v.curr_raw, v.next_raw.rb_mut());
            }
            self.v.precondition_next(self.domain_precond, par, stack);
            let alpha = self.v.next_norm("N", k)?;
            if alpha != 0.0 {
                self.v.normalize_next(alpha);
            }
            alpha
        } else {
            self.v.next_raw_mut().fill(0.0);
            self.v.precondition_next(self.domain_precond, par, stack);
            0.0
        };

        self.alpha = alpha;
        self.steps = k;
        Ok(GolubKahanStep { beta, alpha })
    }

    /// `vₖ₊₁` as formed by the last step.
    #[inline]
    pub fn next_v(&self) -> MatRef<'_, f64> {
        self.v.next()
    }

    /// `v₁` right after [`GolubKahan::start`], `vₖ` between `step` and `advance`.
    #[inline]
    pub fn current_v(&self) -> MatRef<'_, f64> {
        self.v.curr()
    }

    pub fn advance(&mut self) {
        self.u.advance();
        self.v.advance();
    }

    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }
}
