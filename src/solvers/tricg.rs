//! TriCG for symmetric quasi-definite coupled systems.
//!
//! Solves
//!
//! ```text
//! [ τE   A ] [ x ]   [ b ]
//! [ Aᵀ  νF ] [ y ] = [ c ]
//! ```
//!
//! with `E = M⁻¹` and `F = N⁻¹`. The orthogonal tridiagonalization interleaves
//! `vₖ` and `uₖ` into `Wₖ = [v₁ 0 … vₖ 0; 0 u₁ … 0 uₖ]`, turning the coupled
//! operator into the symmetric `Sₖ` with 2x2 blocks `[τ αₖ; αₖ ν]`, `βₖ` coupling
//! `vₖ` to `uₖ₋₁` and `γₖ` coupling `uₖ` to `vₖ₋₁`. The Galerkin condition
//! `Sₖ zₖ = β₁e₁ + γ₁e₂` is solved through `Sₖ = Lₖ Dₖ Lₖᵀ`; row `2k-1` of `Lₖ`
//! holds `σₖ` and row `2k` holds `ηₖ`, `λₖ` (fill) and `δₖ`:
//!
//! ```text
//! d₂ₖ₋₁ = τ - σₖ² d₂ₖ₋₂
//! d₂ₖ   = ν - ηₖ² d₂ₖ₋₃ - λₖ² d₂ₖ₋₂ - δₖ² d₂ₖ₋₁
//! ```
//!
//! The directions `Gₖ = Wₖ Lₖ⁻ᵀ` need only the last two columns, each with an `x`
//! and a `y` part.

use super::{
    BlockSolution, KrylovParams, KrylovStats, Method, Outcome, SqdShifts, Termination,
    two_sided_scratch, zero_residual_status,
};
use crate::{
    algorithms::{breakdown_tolerance, tridiagonal::OrthogonalTridiagonalization},
    error::{KrylovError, KrylovErrorKind, check_precond, check_rows},
    matrix::{Window, axpby, axpy, copy, scale},
};
use faer::{
    Mat, MatRef, Par,
    dyn_stack::{MemStack, StackReq},
    matrix_free::{BiLinOp, LinOp},
};

/// Computes the workspace required by [`tricg`].
pub fn tricg_scratch(
    operator: &impl BiLinOp<f64>,
    range_precond: Option<&dyn LinOp<f64>>,
    domain_precond: Option<&dyn LinOp<f64>>,
    par: Par,
) -> StackReq {
    two_sided_scratch(operator, range_precond, domain_precond, par)
}

/// Solves the coupled system `[τE A; Aᵀ νF] [x; y] = [b; c]` with TriCG.
///
/// # Arguments
/// * `operator`: The `m x n` block `A`.
/// * `b`, `c`: Right-hand sides of lengths `m` and `n`. Both zero is a trivial
///   solve; exactly one of them zero is rejected.
/// * `range_precond`, `domain_precond`: Optional SPD `M = E⁻¹` and `N = F⁻¹`.
/// * `shifts`: `τ` and `ν`, both nonzero. [`SqdShifts::default`] gives the quasi-definite case.
/// * `warm`: Optional `(x₀, y₀)`. Only accepted without preconditioners, since the
///   initial residual needs `E` and `F` themselves.
/// * `params`, `par`, `stack`: As for the other solvers; see [`tricg_scratch`].
#[allow(clippy::too_many_arguments)]
pub fn tricg(
    operator: &impl BiLinOp<f64>,
    b: MatRef<'_, f64>,
    c: MatRef<'_, f64>,
    range_precond: Option<&dyn LinOp<f64>>,
    domain_precond: Option<&dyn LinOp<f64>>,
    shifts: SqdShifts,
    warm: Option<(MatRef<'_, f64>, MatRef<'_, f64>)>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<BlockSolution, KrylovError> {
    implementation(
        operator,
        b,
        c,
        range_precond,
        domain_precond,
        shifts,
        warm,
        params,
        par,
        stack,
    )
}

#[allow(clippy::too_many_arguments)]
fn implementation(
    a: &dyn BiLinOp<f64>,
    b: MatRef<'_, f64>,
    c: MatRef<'_, f64>,
    range_precond: Option<&dyn LinOp<f64>>,
    domain_precond: Option<&dyn LinOp<f64>>,
    shifts: SqdShifts,
    warm: Option<(MatRef<'_, f64>, MatRef<'_, f64>)>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<BlockSolution, KrylovError> {
    params.validate()?;
    let (m, n) = (a.nrows(), a.ncols());
    check_rows("b", m, b.nrows(), b.ncols())?;
    check_rows("c", n, c.nrows(), c.ncols())?;
    check_precond("M", m, range_precond.map(|p| (p.nrows(), p.ncols())))?;
    check_precond("N", n, domain_precond.map(|p| (p.nrows(), p.ncols())))?;
    let SqdShifts { tau, nu } = shifts;
    if !(tau.is_finite() && nu.is_finite()) || tau == 0.0 || nu == 0.0 {
        return Err(KrylovErrorKind::InputError(format!(
            "shifts must be finite and nonzero, found τ = {tau}, ν = {nu}."
        ))
        .into());
    }
    if let Some((x0, y0)) = warm {
        check_rows("x0", m, x0.nrows(), x0.ncols())?;
        check_rows("y0", n, y0.nrows(), y0.ncols())?;
        if range_precond.is_some() || domain_precond.is_some() {
            return Err(KrylovErrorKind::InputError(
                "a warm start cannot be combined with preconditioners.".to_string(),
            )
            .into());
        }
    }

    let method = Method::Tricg;
    let itmax = params.resolve_itmax(method, m, n);
    let mut stats = KrylovStats::new(method, params);

    // [b₀; c₀] = [b - τx₀ - Ay₀; c - Aᵀx₀ - νy₀]
    let mut b0 = Mat::<f64>::zeros(m, 1);
    let mut c0 = Mat::<f64>::zeros(n, 1);
    match warm {
        Some((x0, y0)) => {
            a.apply(b0.as_mut(), y0, par, stack);
            axpby(1.0, b, -1.0, b0.as_mut());
            axpy(-tau, x0, b0.as_mut());
            a.transpose_apply(c0.as_mut(), x0, par, stack);
            axpby(1.0, c, -1.0, c0.as_mut());
            axpy(-nu, y0, c0.as_mut());
        }
        None => {
            copy(b, b0.as_mut());
            copy(c, c0.as_mut());
        }
    }

    let mut process = OrthogonalTridiagonalization::new(a, range_precond, domain_precond);
    let (beta1, gamma1) = process.start(b0.as_ref(), c0.as_ref(), par, stack)?;
    let r0_norm = beta1.hypot(gamma1);
    stats.record_residual(r0_norm);

    let mut x = Mat::<f64>::zeros(m, 1);
    let mut y = Mat::<f64>::zeros(n, 1);
    let finish_with_warm = |x: &mut Mat<f64>, y: &mut Mat<f64>| {
        if let Some((x0, y0)) = warm {
            axpy(1.0, x0, x.as_mut());
            axpy(1.0, y0, y.as_mut());
        }
    };

    if r0_norm == 0.0 {
        finish_with_warm(&mut x, &mut y);
        let status = if warm.is_some() {
            "(x₀, y₀) is a zero-residual solution"
        } else {
            zero_residual_status(false)
        };
        stats.finish(0, Outcome::Solved, status);
        return Ok(BlockSolution { x, y, stats });
    }
    if beta1 == 0.0 || gamma1 == 0.0 {
        let side = if beta1 == 0.0 { "b" } else { "c" };
        return Err(KrylovErrorKind::InputError(format!(
            "`{side}` must be nonzero when the other right-hand side is."
        ))
        .into());
    }

    log::debug!(
        "{method}: {m}x{n}, τ = {tau}, ν = {nu}, ‖r₀‖ = {r0_norm:.3e}, itmax = {itmax}"
    );

    let eps = params.atol + params.rtol * r0_norm;
    let btol = breakdown_tolerance();

    // Slot 0 holds g₂ₖ₋₃ then g₂ₖ, slot 1 holds g₂ₖ₋₂ then g₂ₖ₋₁.
    let mut gx = Window::<2>::zeros(m);
    let mut gy = Window::<2>::zeros(n);

    // LDLᵀ entries of the two previous block rows and the matching πⱼ.
    let (mut d_2km3, mut d_2km2) = (0.0, 0.0);
    let (mut pi_2km3, mut pi_2km2) = (0.0, 0.0);
    let mut delta_km1 = 0.0;

    let mut zero_pivot = false;
    let mut iter = 0;
    let outcome = loop {
        iter += 1;
        let step = process.step(par, stack)?;
        let (alpha, beta, gamma) = (step.alpha, step.beta, step.gamma);

        let (sigma, eta, lambda, d_2km1, delta, d_2k);
        if iter == 1 {
            sigma = 0.0;
            eta = 0.0;
            lambda = 0.0;
            d_2km1 = tau;
            delta = alpha / d_2km1;
            d_2k = nu - delta * delta * d_2km1;
        } else {
            sigma = beta / d_2km2;
            eta = gamma / d_2km3;
            lambda = -(eta * delta_km1 * d_2km3) / d_2km2;
            d_2km1 = tau - sigma * sigma * d_2km2;
            delta = if d_2km1 == 0.0 {
                0.0
            } else {
                (alpha - lambda * sigma * d_2km2) / d_2km1
            };
            d_2k = nu - eta * eta * d_2km3 - lambda * lambda * d_2km2 - delta * delta * d_2km1;
        }
        if d_2km1 == 0.0 || d_2k == 0.0 {
            zero_pivot = true;
            break Outcome::Breakdown;
        }

        // Lₖ Dₖ pₖ = β₁e₁ + γ₁e₂
        let (pi_2km1, pi_2k) = if iter == 1 {
            let pi_1 = beta / d_2km1;
            (pi_1, (gamma - delta * beta) / d_2k)
        } else {
            let pi_2km1 = -(sigma * d_2km2 * pi_2km2) / d_2km1;
            let pi_2k = -(delta * d_2km1 * pi_2km1
                + lambda * d_2km2 * pi_2km2
                + eta * d_2km3 * pi_2km3)
                / d_2k;
            (pi_2km1, pi_2k)
        };

        // g₂ₖ₋₁ = w₂ₖ₋₁ - σₖ g₂ₖ₋₂
        // g₂ₖ   = w₂ₖ - ηₖ g₂ₖ₋₃ - λₖ g₂ₖ₋₂ - δₖ g₂ₖ₋₁
        {
            let [g_a, g_b] = gx.slots_mut();
            axpby(lambda, g_b.as_ref(), eta, g_a.as_mut());
            axpby(1.0, process.current_v(), -sigma, g_b.as_mut());
            axpby(-delta, g_b.as_ref(), -1.0, g_a.as_mut());
            axpy(pi_2km1, g_b.as_ref(), x.as_mut());
            axpy(pi_2k, g_a.as_ref(), x.as_mut());
        }
        {
            let [g_a, g_b] = gy.slots_mut();
            axpby(lambda, g_b.as_ref(), eta, g_a.as_mut());
            scale(-sigma, g_b.as_mut());
            axpby(-delta, g_b.as_ref(), -1.0, g_a.as_mut());
            axpy(1.0, process.current_u(), g_a.as_mut());
            axpy(pi_2km1, g_b.as_ref(), y.as_mut());
            axpy(pi_2k, g_a.as_ref(), y.as_mut());
        }
        // g₂ₖ₋₁ and g₂ₖ become the two previous columns.
        gx.swap(0, 1);
        gy.swap(0, 1);

        // zₖ = Lₖ⁻ᵀ pₖ, last two entries.
        let zeta_2km1 = pi_2km1 - delta * pi_2k;
        let zeta_2k = pi_2k;
        let r_norm = (step.gamma_next * zeta_2km1).hypot(step.beta_next * zeta_2k);
        stats.record_residual(r_norm);
        log::trace!("{method}: iter {iter:>4} ‖r‖ = {r_norm:.6e}");

        (d_2km3, d_2km2) = (d_2km1, d_2k);
        (pi_2km3, pi_2km2) = (pi_2km1, pi_2k);
        delta_km1 = delta;

        let solved = r_norm <= eps;
        let flags = Termination {
            breakdown: !solved && step.beta_next <= btol && step.gamma_next <= btol,
            solved,
            tired: iter >= itmax,
            ..Default::default()
        };
        if let Some(outcome) = flags.outcome() {
            break outcome;
        }
        process.advance();
    };
    finish_with_warm(&mut x, &mut y);

    let status = match outcome {
        Outcome::Breakdown if zero_pivot => "Breakdown: zero pivot in the LDLᵀ factorization",
        Outcome::Breakdown => "Breakdown βₖ₊₁ = γₖ₊₁ = 0",
        other => other.default_status(),
    };
    stats.finish(iter, outcome, status);
    Ok(BlockSolution { x, y, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{dyn_stack::MemBuffer, mat, prelude::Solve};

    fn run(
        a: &Mat<f64>,
        b: &Mat<f64>,
        c: &Mat<f64>,
        shifts: SqdShifts,
        warm: Option<(&Mat<f64>, &Mat<f64>)>,
        params: &KrylovParams,
    ) -> Result<BlockSolution, KrylovError> {
        let op = a.as_ref();
        let mut mem = MemBuffer::new(tricg_scratch(&op, None, None, Par::Seq));
        tricg(
            &op,
            b.as_ref(),
            c.as_ref(),
            None,
            None,
            shifts,
            warm.map(|(x0, y0)| (x0.as_ref(), y0.as_ref())),
            params,
            Par::Seq,
            MemStack::new(&mut mem),
        )
    }

    /// Dense `[τI A; Aᵀ νI] \ [b; c]`, split back into `(x, y)`.
    fn dense_solve(a: &Mat<f64>, b: &Mat<f64>, c: &Mat<f64>, shifts: SqdShifts) -> (Mat<f64>, Mat<f64>) {
        let (m, n) = (a.nrows(), a.ncols());
        let k = Mat::from_fn(m + n, m + n, |i, j| match (i < m, j < m) {
            (true, true) => if i == j { shifts.tau } else { 0.0 },
            (true, false) => a[(i, j - m)],
            (false, true) => a[(j, i - m)],
            (false, false) => if i == j { shifts.nu } else { 0.0 },
        });
        let rhs = Mat::from_fn(m + n, 1, |i, _| if i < m { b[(i, 0)] } else { c[(i - m, 0)] });
        let sol = k.partial_piv_lu().solve(&rhs);
        (
            Mat::from_fn(m, 1, |i, _| sol[(i, 0)]),
            Mat::from_fn(n, 1, |i, _| sol[(m + i, 0)]),
        )
    }

    fn tight() -> KrylovParams {
        KrylovParams {
            atol: 1e-12,
            rtol: 1e-12,
            ..Default::default()
        }
    }

    fn rectangular() -> (Mat<f64>, Mat<f64>, Mat<f64>) {
        let a: Mat<f64> = mat![[2.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 0.0]];
        let b: Mat<f64> = mat![[1.0], [2.0], [3.0], [4.0]];
        let c: Mat<f64> = mat![[1.0], [0.0], [-1.0]];
        (a, b, c)
    }

    #[test]
    fn test_quasi_definite_system() {
        let (a, b, c) = rectangular();
        let shifts = SqdShifts::default();
        let sol = run(&a, &b, &c, shifts, None, &tight()).unwrap();
        assert_eq!(sol.stats.outcome, Outcome::Solved);
        let (x, y) = dense_solve(&a, &b, &c, shifts);
        assert!((&sol.x - &x).norm_l2() < 1e-10);
        assert!((&sol.y - &y).norm_l2() < 1e-10);
    }

    #[test]
    fn test_general_shifts() {
        let (a, b, c) = rectangular();
        let shifts = SqdShifts { tau: 2.0, nu: -0.5 };
        let sol = run(&a, &b, &c, shifts, None, &tight()).unwrap();
        assert!(sol.stats.solved);
        let (x, y) = dense_solve(&a, &b, &c, shifts);
        assert!((&sol.x - &x).norm_l2() < 1e-10);
        assert!((&sol.y - &y).norm_l2() < 1e-10);
    }

    #[test]
    fn test_warm_start_from_solution() {
        let (a, b, c) = rectangular();
        let shifts = SqdShifts::default();
        let first = run(&a, &b, &c, shifts, None, &tight()).unwrap();
        let params = KrylovParams {
            atol: 1e-10,
            rtol: 0.0,
            ..Default::default()
        };
        let second = run(&a, &b, &c, shifts, Some((&first.x, &first.y)), &params).unwrap();
        assert!(second.stats.niter <= 1);
        assert!((&second.x - &first.x).norm_l2() < 1e-10);
    }

    #[test]
    fn test_zero_right_hand_sides() {
        let (a, _, _) = rectangular();
        let b = Mat::<f64>::zeros(4, 1);
        let c = Mat::<f64>::zeros(3, 1);
        let sol = run(&a, &b, &c, SqdShifts::default(), None, &tight()).unwrap();
        assert_eq!(sol.stats.niter, 0);
        assert_eq!(sol.stats.status, "x = 0 is a zero-residual solution");
        assert_eq!(sol.x.norm_l2() + sol.y.norm_l2(), 0.0);
    }

    #[test]
    fn test_invalid_calls_are_rejected() {
        let (a, b, c) = rectangular();
        let zero_c = Mat::<f64>::zeros(3, 1);
        assert!(run(&a, &b, &zero_c, SqdShifts::default(), None, &tight()).is_err());
        let singular = SqdShifts { tau: 0.0, nu: -1.0 };
        assert!(run(&a, &b, &c, singular, None, &tight()).is_err());
        let err = run(&a, &c, &b, SqdShifts::default(), None, &tight()).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }
}
