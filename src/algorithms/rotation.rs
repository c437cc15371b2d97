//! Symmetric Givens reflections.
//!
//! Every factorization updater in this crate extends a banded QR, LQ or QLP
//! factorization by one row or column per iteration, and each extension is a
//! sequence of 2x2 reflections computed here.

/// Computes the reflection that maps `(a, b)` onto `(ρ, 0)`.
///
/// Returns `(c, s, ρ)` such that
///
/// ```text
/// [ c   s ] [ a ]   [ ρ ]
/// [ s  -c ] [ b ] = [ 0 ]
/// ```
///
/// with `c² + s² = 1` and `ρ = √(a² + b²) ≥ 0`. The ratio of the smaller to the
/// larger input is formed first so that squaring cannot overflow or underflow.
/// For `a = b = 0` the identity reflection `(1, 0, 0)` is returned.
#[inline]
pub fn sym_givens(a: f64, b: f64) -> (f64, f64, f64) {
    if b == 0.0 {
        let c = if a == 0.0 { 1.0 } else { a.signum() };
        (c, 0.0, a.abs())
    } else if a == 0.0 {
        (0.0, b.signum(), b.abs())
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = b.signum() / (1.0 + t * t).sqrt();
        let c = s * t;
        // |c| ≤ |s| here, so dividing by s loses nothing.
        (c, s, b / s)
    } else {
        let t = b / a;
        let c = a.signum() / (1.0 + t * t).sqrt();
        let s = c * t;
        (c, s, a / c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(a: f64, b: f64) {
        let (c, s, rho) = sym_givens(a, b);
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!((c * c + s * s - 1.0).abs() < 1e-14, "c²+s² ≠ 1 for ({a}, {b})");
        assert!(
            ((c * a + s * b) - rho).abs() <= 1e-14 * scale,
            "first component for ({a}, {b})"
        );
        assert!(
            (s * a - c * b).abs() <= 1e-14 * scale,
            "second component for ({a}, {b})"
        );
        assert!(rho >= 0.0);
    }

    #[test]
    fn test_zero_inputs() {
        assert_eq!(sym_givens(0.0, 0.0), (1.0, 0.0, 0.0));
        assert_eq!(sym_givens(-2.0, 0.0), (-1.0, 0.0, 2.0));
        assert_eq!(sym_givens(0.0, -3.0), (0.0, -1.0, 3.0));
    }

    #[test]
    fn test_pythagorean_triple() {
        let (c, s, rho) = sym_givens(3.0, 4.0);
        assert!((rho - 5.0).abs() < 1e-15);
        assert!((c - 0.6).abs() < 1e-15);
        assert!((s - 0.8).abs() < 1e-15);
    }

    #[test]
    fn test_reflection_properties() {
        let values = [1.0, -1.0, 0.5, -7.25, 1e-3, 3.0e2];
        for &a in &values {
            for &b in &values {
                check(a, b);
            }
        }
        check(0.0, 2.5);
        check(-4.0, 0.0);
    }

    #[test]
    fn test_extreme_magnitudes_do_not_overflow() {
        let (c, s, rho) = sym_givens(1e300, 1e300);
        assert!(rho.is_finite());
        assert!((rho - 2f64.sqrt() * 1e300).abs() <= 1e286);
        assert!((c - s).abs() < 1e-15);

        let (c, s, rho) = sym_givens(1e-300, 3e-300);
        assert!(rho > 0.0);
        assert!((c * c + s * s - 1.0).abs() < 1e-14);
        assert!((rho - 10f64.sqrt() * 1e-300).abs() <= 1e-314);
    }
}
