//! Basis-generation processes and the scalar primitives the factorizations use.
//!
//! Each process owns the short window of basis vectors its recurrence needs and
//! exposes a `step` that performs the operator applications of one iteration and
//! returns the new recurrence coefficients. The solvers in [`crate::solvers`] feed
//! those coefficients into their running factorization and never touch older basis
//! vectors.
//!
//! The set of processes is closed and paired one-to-one with a factorization; see
//! [`Process`] and [`Factorization`].

pub mod bilanczos;
pub mod golub_kahan;
pub mod lanczos;
pub mod quadratic;
pub mod rotation;
pub mod tridiagonal;

pub use quadratic::{roots_quadratic, to_boundary};
pub use rotation::sym_givens;

/// The basis-generation process behind a solver.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Process {
    /// Symmetric Lanczos: one operator apply per step, tridiagonal `Tₖ`.
    Symmetric,
    /// Two-sided Lanczos on `(A, Aᵀ)`: nonsymmetric tridiagonal `Tₖ` with `βₖ ≠ γₖ`.
    Biorthogonal,
    /// Golub–Kahan bidiagonalization: lower bidiagonal `Bₖ`.
    Bidiagonal,
    /// Saunders–Simon–Yip orthogonal tridiagonalization of `(A, Aᵀ)`: two coupled bases.
    Block,
}

/// The running factorization of the projected matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Factorization {
    /// QR followed by an LQ pass on the triangular factor.
    Qlp,
    Lq,
    Qr,
    /// LDLᵀ of the interleaved 2x2-block tridiagonal matrix.
    Ldl,
}

/// Threshold below which a normalizing coefficient is treated as zero.
///
/// Equal to `ε^{3/4}`, which sits between the rounding noise of an orthogonalized
/// vector (`O(ε)`) and any coefficient that still carries information.
#[inline]
pub fn breakdown_tolerance() -> f64 {
    f64::EPSILON.powf(0.75)
}
