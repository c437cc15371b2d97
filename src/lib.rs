//! Matrix-free short-recurrence Krylov solvers.
//!
//! This crate implements four Krylov methods that share one engine: a basis-generation
//! process applies the operator once or twice per step, a banded factorization of the
//! small projected matrix is extended with Givens reflections, the solution is updated
//! through a fixed window of direction vectors, and the residual norm is estimated from
//! the factorization scalars without ever forming `b - Ax`.
//!
//! Built on the [`faer`] linear algebra framework, the solvers only see matrix-free
//! operators ([`faer::matrix_free::LinOp`] and [`faer::matrix_free::BiLinOp`]), so any
//! dense, sparse or implicit operator can be used.
//!
//! ## Methods
//!
//! | Solver | Problem | Process | Factorization |
//! |--------|---------|---------|---------------|
//! | [`minres_qlp`] | symmetric, possibly singular `(A + λI)x = b` | symmetric Lanczos | QR then LQ |
//! | [`bilq`] | square nonsymmetric `Ax = b` | biorthogonal Lanczos | LQ |
//! | [`lsqr`] | `min ‖Ax - b‖² + λ²‖x‖²` | Golub–Kahan | QR |
//! | [`tricg`] | `[τE A; Aᵀ νF][x; y] = [b; c]` | orthogonal tridiagonalization | block LDLᵀ |
//!
//! Only the last two or three basis and direction vectors are kept, so memory stays
//! `O(n)` regardless of the number of iterations. The price is that orthogonality of the
//! basis is not enforced beyond the three-term recurrences.
//!
//! ## Example Usage
//!
//! ```rust
//! use faer::{Mat, Par, dyn_stack::{MemBuffer, MemStack}};
//! use krylov_project::{KrylovParams, Outcome, minres_qlp, minres_qlp_scratch};
//!
//! // 1D Laplacian, symmetric positive definite.
//! let a = Mat::from_fn(4, 4, |i, j| {
//!     if i == j { 2.0 }
//!     else if (i as isize - j as isize).abs() == 1 { -1.0 }
//!     else { 0.0 }
//! });
//! let b = Mat::from_fn(4, 1, |i, _| (i + 1) as f64);
//!
//! let op = a.as_ref();
//! let mut mem = MemBuffer::new(minres_qlp_scratch(&op, None, Par::Seq));
//! let params = KrylovParams { atol: 1e-12, rtol: 1e-12, ..Default::default() };
//! let sol = minres_qlp(&op, b.as_ref(), None, None, &params, Par::Seq, MemStack::new(&mut mem))
//!     .unwrap();
//!
//! assert_eq!(sol.stats.outcome, Outcome::Solved);
//! assert!(sol.stats.niter <= 4);
//! let residual = &a * &sol.x;
//! assert!((&residual - &b).norm_l2() < 1e-10);
//! ```
//!
//! ## Outcomes
//!
//! A call that cannot start (mismatched shapes, invalid parameters) returns a
//! [`error::KrylovError`]. Every started call returns a solution together with
//! [`KrylovStats`], whose [`Outcome`] tells whether the iteration converged, found a
//! least-squares point, broke down, detected ill-conditioning or ran out of iterations.
//! Logging goes through the [`log`] facade: `debug` at start and termination, `trace`
//! once per iteration.

// Declare the modules that form the crate's API structure.
pub mod algorithms;
pub mod error;
pub mod matrix;
pub mod solvers;

// Re-export the solvers and their call contract for convenient access.
pub use error::KrylovError;
pub use solvers::{
    BlockSolution, KrylovParams, KrylovSolution, KrylovStats, Method, Outcome, SqdShifts, bilq,
    bilq_scratch, lsqr, lsqr_scratch, minres_qlp, minres_qlp_scratch, tricg, tricg_scratch,
};
