//! Vector kernels and fixed-window storage for short-recurrence methods.
//!
//! Every Krylov process in this crate works on single-column `faer` matrices
//! (`n x 1`), exactly like the operators of [`faer::matrix_free`] expect them.
//! The kernels below are the BLAS-1 operations the recurrences need.
//!
//! The short recurrences never need more than the last two or three vectors of a
//! sequence. [`Window`] stores them in a fixed ring that is advanced by rotation,
//! so buffers change roles between iterations instead of being copied or grown.
//! [`BasisSequence`] adds an optional preconditioned twin to such a ring; without a
//! preconditioner the twin is never allocated and the raw vector is used in its place.

use crate::error::{KrylovError, KrylovErrorKind};
use faer::{Mat, MatMut, MatRef, Par, Scale, dyn_stack::MemStack, matrix_free::LinOp, unzip, zip};

/// Returns `xᵀy`.
#[inline]
pub fn dot(x: MatRef<'_, f64>, y: MatRef<'_, f64>) -> f64 {
    x.col(0).transpose() * y.col(0)
}

/// Returns `‖x‖₂`.
#[inline]
pub fn norm(x: MatRef<'_, f64>) -> f64 {
    x.norm_l2()
}

/// `y ← y + a x`
#[inline]
pub fn axpy(a: f64, x: MatRef<'_, f64>, y: MatMut<'_, f64>) {
    if a == 0.0 {
        return;
    }
    zip!(y, x).for_each(|unzip!(y, x)| *y += a * *x);
}

/// `y ← a x + b y`
#[inline]
pub fn axpby(a: f64, x: MatRef<'_, f64>, b: f64, y: MatMut<'_, f64>) {
    zip!(y, x).for_each(|unzip!(y, x)| *y = a * *x + b * *y);
}

/// `x ← a x`
#[inline]
pub fn scale(a: f64, mut x: MatMut<'_, f64>) {
    x *= Scale(a);
}

/// `y ← x`
#[inline]
pub fn copy(x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) {
    y.copy_from(x);
}

/// Applies the reflection `[c s; s -c]` to the pair `(x, y)` in place.
#[inline]
pub fn reflect(c: f64, s: f64, x: MatMut<'_, f64>, y: MatMut<'_, f64>) {
    zip!(x, y).for_each(|unzip!(x, y)| {
        let (xi, yi) = (*x, *y);
        *x = c * xi + s * yi;
        *y = s * xi - c * yi;
    });
}

/// Fixed ring of `N` owned column vectors.
///
/// Slot `0` is the newest vector, slot `N - 1` the oldest. [`Window::advance`]
/// rotates the ring by one so that the oldest buffer becomes slot `0` and can be
/// overwritten by the next vector of the sequence.
#[derive(Clone, Debug)]
pub struct Window<const N: usize> {
    slots: [Mat<f64>; N],
}

impl<const N: usize> Window<N> {
    /// Allocates `N` zero vectors of length `n`.
    pub fn zeros(n: usize) -> Self {
        Self {
            slots: core::array::from_fn(|_| Mat::zeros(n, 1)),
        }
    }

    #[inline]
    pub fn get(&self, slot: usize) -> MatRef<'_, f64> {
        self.slots[slot].as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> MatMut<'_, f64> {
        self.slots[slot].as_mut()
    }

    /// Gives mutable access to every slot at once, newest first.
    #[inline]
    pub fn slots_mut(&mut self) -> &mut [Mat<f64>; N] {
        &mut self.slots
    }

    /// Shifts every vector one slot towards the old end. The buffer that held the
    /// oldest vector moves to slot `0`; its contents are stale until overwritten.
    #[inline]
    pub fn advance(&mut self) {
        self.slots.rotate_right(1);
    }

    /// Exchanges the buffers of two slots without copying.
    #[inline]
    pub fn swap(&mut self, a: usize, b: usize) {
        self.slots.swap(a, b);
    }
}

/// Simultaneous views into a [`BasisSequence`] while its next vector is being formed.
pub struct SequenceViews<'a> {
    pub next_raw: MatMut<'a, f64>,
    /// Current vector as the operator consumes it.
    pub curr: MatRef<'a, f64>,
    pub curr_raw: MatRef<'a, f64>,
    pub prev_raw: MatRef<'a, f64>,
}

const NEXT: usize = 0;
const CURR: usize = 1;
const PREV: usize = 2;

/// Three-term basis sequence `{vₖ₋₁, vₖ, vₖ₊₁}` with an optional preconditioned twin.
///
/// The raw vectors are the ones orthogonalized in the preconditioner's inverse
/// inner product; the twin holds `M` applied to the raw vectors and is the one the
/// operator is applied to. Only the current and next twins are ever needed.
#[derive(Clone, Debug)]
pub struct BasisSequence {
    raw: Window<3>,
    preconditioned: Option<Window<2>>,
}

impl BasisSequence {
    pub fn new(n: usize, preconditioned: bool) -> Self {
        Self {
            raw: Window::zeros(n),
            preconditioned: preconditioned.then(|| Window::zeros(n)),
        }
    }

    #[inline]
    pub fn is_preconditioned(&self) -> bool {
        self.preconditioned.is_some()
    }

    #[inline]
    pub fn prev_raw(&self) -> MatRef<'_, f64> {
        self.raw.get(PREV)
    }

    #[inline]
    pub fn curr_raw(&self) -> MatRef<'_, f64> {
        self.raw.get(CURR)
    }

    #[inline]
    pub fn next_raw(&self) -> MatRef<'_, f64> {
        self.raw.get(NEXT)
    }

    #[inline]
    pub fn next_raw_mut(&mut self) -> MatMut<'_, f64> {
        self.raw.get_mut(NEXT)
    }

    /// Current vector in the form the operator consumes (`M` applied if present).
    #[inline]
    pub fn curr(&self) -> MatRef<'_, f64> {
        match &self.preconditioned {
            Some(twin) => twin.get(1),
            None => self.raw.get(CURR),
        }
    }

    /// Next vector in the form the operator consumes.
    #[inline]
    pub fn next(&self) -> MatRef<'_, f64> {
        match &self.preconditioned {
            Some(twin) => twin.get(0),
            None => self.raw.get(NEXT),
        }
    }

    /// Loads `src` into the next raw slot, typically to start the sequence from a residual.
    pub fn seed(&mut self, src: MatRef<'_, f64>) {
        copy(src, self.raw.get_mut(NEXT));
    }

    /// Borrows the next raw vector for writing alongside read views of the others.
    pub fn views_mut(&mut self) -> SequenceViews<'_> {
        let [next, curr, prev] = self.raw.slots_mut();
        let curr: &Mat<f64> = curr;
        SequenceViews {
            next_raw: next.as_mut(),
            curr: match &self.preconditioned {
                Some(twin) => twin.get(1),
                None => curr.as_ref(),
            },
            curr_raw: curr.as_ref(),
            prev_raw: prev.as_ref(),
        }
    }

    /// Applies `precond` to the next raw vector, filling the twin. No-op without one.
    pub fn precondition_next(
        &mut self,
        precond: Option<&dyn LinOp<f64>>,
        par: Par,
        stack: &mut MemStack,
    ) {
        if let (Some(m), Some(twin)) = (precond, self.preconditioned.as_mut()) {
            m.apply(twin.get_mut(0), self.raw.get(NEXT), par, stack);
        }
    }

    /// Returns `√⟨M r, r⟩` for the next raw vector `r`, or `‖r‖` without preconditioner.
    pub fn next_norm(&self, name: &'static str, step: usize) -> Result<f64, KrylovError> {
        let energy = dot(self.next(), self.next_raw());
        if energy < 0.0 {
            return Err(KrylovErrorKind::NotPositiveDefinite { name, step }.into());
        }
        Ok(energy.sqrt())
    }

    /// Divides the next raw vector (and its twin) by `norm`.
    pub fn normalize_next(&mut self, norm: f64) {
        let inv = norm.recip();
        scale(inv, self.raw.get_mut(NEXT));
        if let Some(twin) = self.preconditioned.as_mut() {
            scale(inv, twin.get_mut(0));
        }
    }

    /// Makes the next vector current and the current one previous.
    ///
    /// Both rings rotate; no vector data is copied.
    pub fn advance(&mut self) {
        self.raw.advance();
        if let Some(twin) = self.preconditioned.as_mut() {
            twin.advance();
        }
    }
}
