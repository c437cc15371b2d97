//! Real roots of quadratics, used to clip steps to a trust-region boundary.

use crate::matrix::dot;
use faer::MatRef;

/// Newton refinement steps applied to each root.
const REFINEMENT_STEPS: usize = 1;

/// Returns the two real roots of `q₂x² + q₁x + q₀`, or `None` if they are complex.
///
/// The larger-magnitude root is formed without cancellation as
/// `d = -(q₁ + sign(q₁)√Δ)/2`, `x₁ = d/q₂`, `x₂ = q₀/d`. When `|q₀q₂|` is tiny
/// compared to `q₁²` the discriminant carries no information and the roots
/// `-q₁/q₂` and `0` are used as starting values. Each root then receives one
/// Newton step. A linear polynomial returns its single root twice, and a
/// constant polynomial returns `(0, 0)`.
pub fn roots_quadratic(q2: f64, q1: f64, q0: f64) -> Option<(f64, f64)> {
    if q2 == 0.0 {
        if q1 == 0.0 {
            log::warn!("constant polynomial {q0} has no roots, returning zero");
            return Some((0.0, 0.0));
        }
        let root = -q0 / q1;
        return Some((root, root));
    }

    let (mut root1, mut root2) = if (q0 * q2).abs() > f64::EPSILON.sqrt() * q1 * q1 {
        let discriminant = q1 * q1 - 4.0 * q2 * q0;
        if discriminant < 0.0 {
            return None;
        }
        let d = -(q1 + discriminant.sqrt().copysign(q1)) / 2.0;
        (d / q2, q0 / d)
    } else {
        (-q1 / q2, 0.0)
    };

    for _ in 0..REFINEMENT_STEPS {
        root1 = newton_step(q2, q1, q0, root1);
        root2 = newton_step(q2, q1, q0, root2);
    }
    Some((root1, root2))
}

fn newton_step(q2: f64, q1: f64, q0: f64, root: f64) -> f64 {
    let q = (q2 * root + q1) * root + q0;
    let dq = 2.0 * q2 * root + q1;
    if dq == 0.0 { root } else { root - q / dq }
}

/// Returns the roots `σ` of `‖x + σd‖ = radius`.
///
/// When `x` lies inside the ball the roots have opposite signs. `None` means the
/// line through `x` along `d` misses the ball, which can only happen when `x` is
/// already outside it.
pub fn to_boundary(x: MatRef<'_, f64>, d: MatRef<'_, f64>, radius: f64) -> Option<(f64, f64)> {
    let dd = dot(d, d);
    let xd = dot(x, d);
    let xx = dot(x, x);
    roots_quadratic(dd, 2.0 * xd, xx - radius * radius)
}
