//! This module defines the custom error types for the library.
//!
//! Only calls that cannot be started are reported through [`KrylovError`]: shape
//! mismatches, non-square operators where squareness is required, degenerate
//! inputs and invalid parameters. Numerical outcomes of a started iteration
//! (breakdown, ill-conditioning, exhaustion) are ordinary results and live in
//! [`crate::solvers::KrylovStats`] instead.
//!
//! Using the [`thiserror`] crate allows us to create idiomatic error types with minimal
//! boilerplate.
use thiserror::Error;

/// Represents all possible errors that can reject a solver call.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct KrylovError(#[from] KrylovErrorKind);

/// Private enum containing the distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum KrylovErrorKind {
    /// A vector or preconditioner does not match the dimension the operator imposes.
    #[error("Dimension mismatch for `{name}`: expected {expected} rows, found {actual}.")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The method requires a square operator.
    #[error("Operator must be square, found {nrows}x{ncols}.")]
    NonSquareOperator { nrows: usize, ncols: usize },

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),

    /// A preconditioner returned a negative energy `<Mv, v>`, so it is not positive definite.
    #[error("Preconditioner `{name}` is not positive definite (detected at step {step}).")]
    NotPositiveDefinite { name: &'static str, step: usize },
}

impl KrylovError {
    /// Returns `true` when the call was rejected because of mismatched dimensions.
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(
            self.0,
            KrylovErrorKind::DimensionMismatch { .. } | KrylovErrorKind::NonSquareOperator { .. }
        )
    }
}

// Manually implement PartialEq for the public error type.
// We compare the inner `KrylovErrorKind`.
impl PartialEq for KrylovError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Checks that a single-column right-hand side has `expected` rows.
pub(crate) fn check_rows(
    name: &'static str,
    expected: usize,
    rows: usize,
    cols: usize,
) -> Result<(), KrylovError> {
    if cols != 1 {
        return Err(KrylovErrorKind::InputError(format!(
            "`{name}` must be a single column, found {cols} columns."
        ))
        .into());
    }
    if rows != expected {
        return Err(KrylovErrorKind::DimensionMismatch {
            name,
            expected,
            actual: rows,
        }
        .into());
    }
    Ok(())
}

/// Checks that a square operator has shape `n x n`.
pub(crate) fn check_square(nrows: usize, ncols: usize) -> Result<(), KrylovError> {
    if nrows != ncols {
        return Err(KrylovErrorKind::NonSquareOperator { nrows, ncols }.into());
    }
    Ok(())
}

/// Checks that an optional preconditioner acts on vectors of length `n`.
pub(crate) fn check_precond(
    name: &'static str,
    n: usize,
    shape: Option<(usize, usize)>,
) -> Result<(), KrylovError> {
    if let Some((nrows, ncols)) = shape {
        for actual in [nrows, ncols] {
            if actual != n {
                return Err(KrylovErrorKind::DimensionMismatch {
                    name,
                    expected: n,
                    actual,
                }
                .into());
            }
        }
    }
    Ok(())
}
