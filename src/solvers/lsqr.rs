//! LSQR for least-squares problems with optional Tikhonov regularization.
//!
//! Minimizes `‖b - Ax‖²_M + λ²‖x‖²_{N⁻¹}`: the residual is weighted by the range
//! preconditioner `M` itself, so the iterates approach the solution of the normal
//! equations `(AᵀMA + λ²N⁻¹) x = AᵀMb`. The Golub–Kahan process produces the lower
//! bidiagonal `Bₖ`; each step appends one column and a QR factorization of
//! `[Bₖ; λI]` is extended by two reflections, the first folding in the
//! regularization and the second eliminating `βₖ₊₁`.
//! A second pass of reflections on the right of `Rₖ` only serves to estimate `‖x‖`.
//!
//! With `radius > 0` every step is clipped to `‖x‖ ≤ radius` and the solve stops
//! once the boundary is hit.

use super::{
    KrylovParams, KrylovSolution, KrylovStats, Method, Outcome, Termination, initial_residual,
    two_sided_scratch, zero_residual_status,
};
use crate::{
    algorithms::{golub_kahan::GolubKahan, sym_givens, to_boundary},
    error::{KrylovError, check_precond, check_rows},
    matrix::{axpby, axpy, copy, dot, norm},
};
use faer::{
    Mat, MatRef, Par,
    dyn_stack::{MemStack, StackReq},
    matrix_free::{BiLinOp, LinOp},
};

/// Computes the workspace required by [`lsqr`].
pub fn lsqr_scratch(
    operator: &impl BiLinOp<f64>,
    range_precond: Option<&dyn LinOp<f64>>,
    domain_precond: Option<&dyn LinOp<f64>>,
    par: Par,
) -> StackReq {
    two_sided_scratch(operator, range_precond, domain_precond, par)
}

/// Solves `min ‖b - Ax‖²_M + λ²‖x‖²_{N⁻¹}` with LSQR.
///
/// # Arguments
/// * `operator`: A rectangular `m x n` operator; `apply` and `transpose_apply` are used.
/// * `b`: The right-hand side, `m x 1`.
/// * `range_precond`: Optional SPD `M` of size `m`, the weight of the residual norm.
/// * `domain_precond`: Optional SPD `N` of size `n`; the regularization is weighted by `N⁻¹`.
/// * `x0`: Optional warm start; the correction is computed and added to it.
/// * `params`: `lambda` is the regularization, `radius > 0` enables the trust region.
/// * `par`, `stack`: Parallelism and workspace, sized by [`lsqr_scratch`].
///
/// # Returns
/// The solution and statistics. [`KrylovStats::inconsistent`] is set whenever the
/// returned point does not zero the residual.
#[allow(clippy::too_many_arguments)]
pub fn lsqr(
    operator: &impl BiLinOp<f64>,
    b: MatRef<'_, f64>,
    range_precond: Option<&dyn LinOp<f64>>,
    domain_precond: Option<&dyn LinOp<f64>>,
    x0: Option<MatRef<'_, f64>>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<KrylovSolution, KrylovError> {
    implementation(
        operator,
        b,
        range_precond,
        domain_precond,
        x0,
        params,
        par,
        stack,
    )
}

#[allow(clippy::too_many_arguments)]
fn implementation(
    a: &dyn BiLinOp<f64>,
    b: MatRef<'_, f64>,
    range_precond: Option<&dyn LinOp<f64>>,
    domain_precond: Option<&dyn LinOp<f64>>,
    x0: Option<MatRef<'_, f64>>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<KrylovSolution, KrylovError> {
    params.validate()?;
    let (m, n) = (a.nrows(), a.ncols());
    check_rows("b", m, b.nrows(), b.ncols())?;
    check_precond("M", m, range_precond.map(|p| (p.nrows(), p.ncols())))?;
    check_precond("N", n, domain_precond.map(|p| (p.nrows(), p.ncols())))?;
    if let Some(x0) = x0 {
        check_rows("x0", n, x0.nrows(), x0.ncols())?;
    }

    let method = Method::Lsqr;
    let itmax = params.resolve_itmax(method, m, n);
    let (lambda, radius) = (params.lambda, params.radius);
    let mut stats = KrylovStats::new(method, params);

    let r0 = initial_residual(a, b, x0, par, stack);
    let mut gk = GolubKahan::new(a, range_precond, domain_precond);
    let (beta1, alpha1) = gk.start(r0.as_ref(), par, stack)?;
    stats.record_residual(beta1);

    let mut x = Mat::<f64>::zeros(n, 1);
    let finish_with_x0 = |x: &mut Mat<f64>| {
        if let Some(x0) = x0 {
            axpy(1.0, x0, x.as_mut());
        }
    };

    if beta1 == 0.0 {
        finish_with_x0(&mut x);
        stats.finish(0, Outcome::Solved, zero_residual_status(x0.is_some()));
        return Ok(KrylovSolution { x, stats });
    }
    let ar_norm0 = alpha1 * beta1;
    stats.record_a_residual(ar_norm0);
    if alpha1 == 0.0 {
        finish_with_x0(&mut x);
        let status = if x0.is_some() {
            "x₀ is a minimum least-squares solution"
        } else {
            "x = 0 is a minimum least-squares solution"
        };
        stats.finish(0, Outcome::Inconsistent, status);
        return Ok(KrylovSolution { x, stats });
    }

    log::debug!(
        "{method}: {m}x{n}, ‖r₀‖ = {beta1:.3e}, ‖Aᵀr₀‖ = {ar_norm0:.3e}, λ = {lambda}, radius = {radius}, itmax = {itmax}"
    );

    let eps_r = params.atol + params.rtol * beta1;
    let eps_ar = params.atol + params.rtol * ar_norm0;

    let mut w = Mat::<f64>::zeros(n, 1);
    copy(gk.current_v(), w.as_mut());

    let mut alpha = alpha1;
    let mut phi_bar = beta1;
    let mut rho_bar = alpha1;

    // ‖A‖_F, ‖Rₖ⁻¹‖_F and the regularization part of the residual.
    let mut anorm2 = 0.0;
    let mut dnorm2 = 0.0;
    let mut res2 = 0.0;

    // Reflection on the right of Rₖ used for ‖x‖.
    let (mut c2, mut s2) = (-1.0, 0.0);
    let mut z = 0.0;
    let mut xnorm2 = 0.0;

    let mut on_boundary = false;
    let mut zero_resid = false;
    let mut iter = 0;
    let outcome = loop {
        iter += 1;
        let step = gk.step(par, stack)?;
        let beta = step.beta;
        anorm2 += alpha * alpha + beta * beta + lambda * lambda;
        alpha = step.alpha;

        // Fold in λ, then eliminate βₖ₊₁:
        // [ c  s ] [ ρ̄ₖ    0   ]   [ ρₖ  θₖ₊₁ ]
        // [ s -c ] [ βₖ₊₁ αₖ₊₁ ] = [ 0   ρ̄ₖ₊₁ ]
        let (c1, s1, rho_bar1) = sym_givens(rho_bar, lambda);
        let psi = s1 * phi_bar;
        phi_bar *= c1;

        let (c, s, rho) = sym_givens(rho_bar1, beta);
        if rho == 0.0 {
            break Outcome::Breakdown;
        }
        let phi = c * phi_bar;
        phi_bar *= s;
        let tau = s * phi;
        let theta = s * alpha;
        rho_bar = -c * alpha;
        dnorm2 += dot(w.as_ref(), w.as_ref()) / (rho * rho);

        // xₖ = xₖ₋₁ + σ wₖ, with σ clipped to the trust region.
        let mut sigma = phi / rho;
        if radius > 0.0 {
            let (t1, t2) = to_boundary(x.as_ref(), w.as_ref(), radius).unwrap_or_else(|| {
                log::warn!("{method}: iterate left the trust region at iteration {iter}");
                (0.0, 0.0)
            });
            let (tmax, tmin) = (t1.max(t2), t1.min(t2));
            on_boundary = sigma > tmax || sigma < tmin;
            sigma = if sigma > 0.0 { sigma.min(tmax) } else { sigma.max(tmin) };
        }
        axpy(sigma, w.as_ref(), x.as_mut());
        axpby(1.0, gk.next_v(), -theta / rho, w.as_mut());

        // ‖xₖ‖ from the LQ factorization of Rₖ.
        let delta = s2 * rho;
        let gamma_bar = -c2 * rho;
        let rhs = phi - delta * z;
        let z_bar = if gamma_bar == 0.0 { 0.0 } else { rhs / gamma_bar };
        let xnorm = (xnorm2 + z_bar * z_bar).sqrt();
        let (c, s, gamma) = sym_givens(gamma_bar, theta);
        (c2, s2) = (c, s);
        z = if gamma == 0.0 { 0.0 } else { rhs / gamma };
        xnorm2 += z * z;

        let anorm = anorm2.sqrt();
        let acond = anorm * dnorm2.sqrt();
        res2 += psi * psi;
        let r_norm = (phi_bar * phi_bar + res2).sqrt();
        let ar_norm = alpha * tau.abs();
        stats.anorm = anorm;
        stats.acond = acond;
        stats.record_residual(r_norm);
        stats.record_a_residual(ar_norm);

        log::trace!(
            "{method}: iter {iter:>4} ‖r‖ = {r_norm:.6e} ‖Aᵀr‖ = {ar_norm:.6e} ‖x‖ = {xnorm:.3e}"
        );

        // The estimates above belong to the unclipped step.
        zero_resid = !on_boundary
            && (r_norm <= eps_r || 1.0 + r_norm / (beta1 + anorm * xnorm) <= 1.0);
        let least_squares =
            ar_norm <= eps_ar || 1.0 + ar_norm / (anorm * r_norm) <= 1.0 || r_norm == 0.0;
        let flags = Termination {
            breakdown: false,
            ill_conditioned: acond >= params.conlim || 1.0 + 1.0 / acond <= 1.0,
            solved_alternate: false,
            solved: zero_resid || on_boundary,
            inconsistent: least_squares,
            tired: iter >= itmax,
        };
        if let Some(outcome) = flags.outcome() {
            break outcome;
        }
        gk.advance();
    };
    if on_boundary {
        // Residual of the clipped point, in the same `M`-norm as `β₁`.
        let r = initial_residual(a, r0.as_ref(), Some(x.as_ref()), par, stack);
        let r_norm = match range_precond {
            Some(precond) => {
                let mut mr = Mat::<f64>::zeros(m, 1);
                precond.apply(mr.as_mut(), r.as_ref(), par, stack);
                dot(mr.as_ref(), r.as_ref()).max(0.0).sqrt()
            }
            None => norm(r.as_ref()),
        };
        if let Some(last) = stats.residuals.last_mut() {
            *last = r_norm;
        }
        zero_resid = r_norm <= eps_r;
    }
    finish_with_x0(&mut x);

    let status = match outcome {
        Outcome::Breakdown => "Breakdown ρₖ = 0",
        Outcome::IllConditioned if stats.acond >= params.conlim => {
            "condition number exceeds tolerance"
        }
        Outcome::Solved if on_boundary => "on trust-region boundary",
        Outcome::Solved => "found approximate zero-residual solution",
        other => other.default_status(),
    };
    stats.finish(iter, outcome, status);
    if outcome == Outcome::Solved && on_boundary {
        stats.inconsistent = !zero_resid;
    }
    Ok(KrylovSolution { x, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{dyn_stack::MemBuffer, mat, prelude::Solve};

    fn run(
        a: &Mat<f64>,
        b: &Mat<f64>,
        x0: Option<&Mat<f64>>,
        params: &KrylovParams,
    ) -> Result<KrylovSolution, KrylovError> {
        let op = a.as_ref();
        let mut mem = MemBuffer::new(lsqr_scratch(&op, None, None, Par::Seq));
        lsqr(
            &op,
            b.as_ref(),
            None,
            None,
            x0.map(|x0| x0.as_ref()),
            params,
            Par::Seq,
            MemStack::new(&mut mem),
        )
    }

    fn tight() -> KrylovParams {
        KrylovParams {
            atol: 1e-12,
            rtol: 1e-12,
            history: true,
            ..Default::default()
        }
    }

    fn spd4() -> Mat<f64> {
        mat![
            [4.0, 1.0, 0.0, 0.0],
            [1.0, 3.0, 1.0, 0.0],
            [0.0, 1.0, 2.0, 0.5],
            [0.0, 0.0, 0.5, 1.0],
        ]
    }

    #[test]
    fn test_square_system_residual_is_monotone() {
        let a = spd4();
        let exact: Mat<f64> = mat![[1.0], [-1.0], [2.0], [0.5]];
        let b = &a * &exact;
        let sol = run(&a, &b, None, &tight()).unwrap();
        assert_eq!(sol.stats.outcome, Outcome::Solved);
        assert!(!sol.stats.inconsistent);
        assert!((&sol.x - &exact).norm_l2() < 1e-10);
        let history = &sol.stats.residuals;
        assert_eq!(history.len(), sol.stats.niter + 1);
        assert!(history.windows(2).all(|w| w[1] <= w[0] * (1.0 + 1e-12)));
    }

    #[test]
    fn test_overdetermined_least_squares() {
        // Normal equations [2 1; 1 2] x = [1; 1].
        let a: Mat<f64> = mat![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let b: Mat<f64> = mat![[1.0], [1.0], [0.0]];
        let sol = run(&a, &b, None, &KrylovParams::default()).unwrap();
        assert_eq!(sol.stats.outcome, Outcome::Inconsistent);
        assert!(sol.stats.solved && sol.stats.inconsistent);
        for i in 0..2 {
            assert!((sol.x[(i, 0)] - 1.0 / 3.0).abs() < 1e-8);
        }
    }

    #[test]
    fn test_residual_is_weighted_by_range_preconditioner() {
        let a: Mat<f64> = mat![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let b: Mat<f64> = mat![[1.0], [1.0], [0.0]];
        let weight = Mat::from_fn(3, 3, |i, j| if i == j { (i + 1) as f64 } else { 0.0 });

        let op = a.as_ref();
        let precond = weight.as_ref();
        let mut mem = MemBuffer::new(lsqr_scratch(&op, Some(&precond), None, Par::Seq));
        let sol = lsqr(
            &op,
            b.as_ref(),
            Some(&precond),
            None,
            None,
            &tight(),
            Par::Seq,
            MemStack::new(&mut mem),
        )
        .unwrap();

        // (AᵀMA) x = AᵀMb
        let normal = a.transpose() * &weight * &a;
        let rhs = a.transpose() * &weight * &b;
        let exact = normal.partial_piv_lu().solve(&rhs);
        assert!(sol.stats.solved);
        assert!((&sol.x - &exact).norm_l2() < 1e-10);
    }

    #[test]
    fn test_regularization() {
        // (I + I) x = b
        let a = Mat::<f64>::identity(2, 2);
        let b: Mat<f64> = mat![[1.0], [2.0]];
        let params = KrylovParams {
            lambda: 1.0,
            ..Default::default()
        };
        let sol = run(&a, &b, None, &params).unwrap();
        assert!(sol.stats.solved);
        assert!((sol.x[(0, 0)] - 0.5).abs() < 1e-8);
        assert!((sol.x[(1, 0)] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_trust_region_boundary() {
        let a = Mat::<f64>::identity(2, 2);
        let b: Mat<f64> = mat![[3.0], [4.0]];
        let params = KrylovParams {
            radius: 1.0,
            history: true,
            ..Default::default()
        };
        let sol = run(&a, &b, None, &params).unwrap();
        assert_eq!(sol.stats.outcome, Outcome::Solved);
        assert_eq!(sol.stats.status, "on trust-region boundary");
        assert!(sol.stats.solved && sol.stats.inconsistent);
        // ‖b - x‖ = ‖(2.4, 3.2)‖ for the clipped point.
        let last = sol.stats.residuals.last().copied().unwrap();
        assert!((last - 4.0).abs() < 1e-12);
        assert!((sol.x.norm_l2() - 1.0).abs() < 1e-12);
        assert!((sol.x[(0, 0)] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_rhs_orthogonal_to_range() {
        let a: Mat<f64> = mat![[1.0, 0.0], [0.0, 0.0]];
        let b: Mat<f64> = mat![[0.0], [1.0]];
        let sol = run(&a, &b, None, &KrylovParams::default()).unwrap();
        assert_eq!(sol.stats.niter, 0);
        assert_eq!(sol.stats.outcome, Outcome::Inconsistent);
        assert_eq!(sol.x.norm_l2(), 0.0);
    }

    #[test]
    fn test_warm_start_from_solution() {
        let a = spd4();
        let exact: Mat<f64> = mat![[1.0], [-1.0], [2.0], [0.5]];
        let b = &a * &exact;
        let first = run(&a, &b, None, &tight()).unwrap();
        let params = KrylovParams {
            atol: 1e-10,
            rtol: 0.0,
            ..Default::default()
        };
        let second = run(&a, &b, Some(&first.x), &params).unwrap();
        assert!(second.stats.niter <= 1);
        assert!((&second.x - &first.x).norm_l2() < 1e-10);
    }

    #[test]
    fn test_wrong_rhs_length_is_rejected() {
        let a: Mat<f64> = mat![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let b: Mat<f64> = mat![[1.0], [1.0]];
        let err = run(&a, &b, None, &KrylovParams::default()).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }
}
