//! MINRES-QLP for symmetric, possibly singular or indefinite systems.
//!
//! Solves `(A + λI) x = b` by minimizing `‖r‖_M` over the Krylov subspace built by
//! the preconditioned symmetric Lanczos process. The projected tridiagonal
//! `Tₖ₊₁.ₖ` is reduced by a QR factorization `Qₖ Tₖ₊₁.ₖ = [Rₖ; 0]`, and `Rₖ`
//! is factored once more from the right, `Rₖ = Lₖ Pₖ`. The extra LQ pass gives
//! the minimum-length solution on singular consistent systems and the
//! minimum-length least-squares solution on singular inconsistent ones, and its
//! diagonal yields a condition estimate.
//!
//! Both factorizations are banded, so only the last two reflections of each pass
//! and three direction vectors are kept:
//!
//! ```text
//! QR pass  : ϵₖ₋₂, γₖ₋₁, λₖ        (reflections Qₖ₋₂, Qₖ₋₁, Qₖ)
//! LQ pass  : μₖ₋₂, μ̊ₖ₋₁, μ̄ₖ        (reflections Pₖ, Dₖ)
//! directions wₖ₋₂ (final), ẘₖ₋₁, w̄ₖ
//! ```

use super::{
    KrylovParams, KrylovSolution, KrylovStats, Method, Outcome, Termination, initial_residual,
    zero_residual_status,
};
use crate::{
    algorithms::{breakdown_tolerance, lanczos::SymmetricLanczos, sym_givens},
    error::{KrylovError, check_precond, check_rows, check_square},
    matrix::{Window, axpby, axpy, copy, norm, reflect},
};
use faer::{
    Mat, MatRef, Par,
    dyn_stack::{MemStack, StackReq},
    matrix_free::LinOp,
};

/// Returns `num / den`, or zero when the pivot `den` vanished.
#[inline]
fn guarded_div(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

/// Computes the workspace required by [`minres_qlp`].
pub fn minres_qlp_scratch(
    operator: &impl LinOp<f64>,
    precond: Option<&dyn LinOp<f64>>,
    par: Par,
) -> StackReq {
    let op = operator.apply_scratch(1, par);
    match precond {
        Some(m) => StackReq::any_of(&[op, m.apply_scratch(1, par)]),
        None => op,
    }
}

/// Solves the symmetric system `(A + λI) x = b` with MINRES-QLP.
///
/// # Arguments
/// * `operator`: A symmetric operator `A`; only `apply` is used.
/// * `b`: The right-hand side, a single column.
/// * `precond`: Optional SPD preconditioner `M ≈ (A + λI)⁻¹`, applied by multiplication.
/// * `x0`: Optional warm start; the correction is computed and added to it.
/// * `params`: Tolerances and budget; `params.lambda` is the shift `λ`.
/// * `par`, `stack`: Parallelism and workspace, sized by [`minres_qlp_scratch`].
///
/// # Returns
/// The solution with statistics, or a [`KrylovError`] if the call could not start.
pub fn minres_qlp(
    operator: &impl LinOp<f64>,
    b: MatRef<'_, f64>,
    precond: Option<&dyn LinOp<f64>>,
    x0: Option<MatRef<'_, f64>>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<KrylovSolution, KrylovError> {
    implementation(operator, b, precond, x0, params, par, stack)
}

fn implementation(
    a: &dyn LinOp<f64>,
    b: MatRef<'_, f64>,
    precond: Option<&dyn LinOp<f64>>,
    x0: Option<MatRef<'_, f64>>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<KrylovSolution, KrylovError> {
    params.validate()?;
    check_square(a.nrows(), a.ncols())?;
    let n = a.nrows();
    check_rows("b", n, b.nrows(), b.ncols())?;
    check_precond("M", n, precond.map(|m| (m.nrows(), m.ncols())))?;
    if let Some(x0) = x0 {
        check_rows("x0", n, x0.nrows(), x0.ncols())?;
    }

    let method = Method::MinresQlp;
    let itmax = params.resolve_itmax(method, n, n);
    let lambda = params.lambda;
    let mut stats = KrylovStats::new(method, params);

    // r₀ = b - (A + λI) x₀
    let mut r0 = initial_residual(a, b, x0, par, stack);
    if let Some(x0) = x0 {
        axpy(-lambda, x0, r0.as_mut());
    }

    let mut lanczos = SymmetricLanczos::new(a, precond, lambda);
    let beta1 = lanczos.start(r0.as_ref(), par, stack)?;
    stats.record_residual(beta1);

    let mut x = Mat::<f64>::zeros(n, 1);
    if beta1 == 0.0 {
        if let Some(x0) = x0 {
            copy(x0, x.as_mut());
        }
        stats.finish(0, Outcome::Solved, zero_residual_status(x0.is_some()));
        return Ok(KrylovSolution { x, stats });
    }

    log::debug!(
        "{method}: n = {n}, ‖r₀‖ = {beta1:.3e}, itmax = {itmax}, preconditioned = {}",
        precond.is_some()
    );

    let eps = params.atol + params.rtol * beta1;
    let sqrt_eps = f64::EPSILON.sqrt();
    let btol = breakdown_tolerance();

    // Directions: slot 0 holds w̄ₖ, slot 1 holds ẘₖ₋₁.
    let mut w = Window::<2>::zeros(n);

    // QR pass: reflections Qₖ₋₂ and Qₖ₋₁, right-hand side ζ̄ₖ.
    let (mut c_km2, mut s_km2) = (-1.0, 0.0);
    let (mut c_km1, mut s_km1) = (-1.0, 0.0);
    let mut zeta_bar = beta1;
    let mut zeta_km1 = 0.0;

    // LQ pass.
    let mut mu_bar_km1 = 0.0;
    let mut mu_bis_km1 = 0.0;
    let mut mu_bis_km2 = 0.0;
    let mut psi_bar_km1 = 0.0;
    let mut psi_bar_km2 = 0.0;

    // Lₖ tₖ = zₖ
    let mut tau_bar;
    let mut tau_bis = 0.0;
    let mut xi_k = 0.0;
    let mut xi_km1 = 0.0;

    let mut anorm2 = 0.0;
    let mut mu_min = f64::INFINITY;
    let mut mu_max = 0.0f64;
    let mut ar_tol = 0.0;
    let mut iter = 0;

    let (outcome, status) = loop {
        iter += 1;
        let step = lanczos.step(par, stack)?;
        let (alpha, beta_k, beta_next) = (step.alpha, step.beta, step.beta_next);

        // ‖Tₖ₊₁.ₖ‖²_F
        anorm2 += alpha * alpha + beta_next * beta_next;
        if iter > 1 {
            anorm2 += beta_k * beta_k;
        }

        // Apply Qₖ₋₂ and Qₖ₋₁ to the new column (…, βₖ, αₖ, βₖ₊₁).
        let mut epsilon_km2 = 0.0;
        let mut gamma_km1 = 0.0;
        let lambda_bar = if iter == 1 {
            alpha
        } else {
            let gamma_bar = if iter == 2 {
                beta_k
            } else {
                epsilon_km2 = s_km2 * beta_k;
                -c_km2 * beta_k
            };
            gamma_km1 = c_km1 * gamma_bar + s_km1 * alpha;
            s_km1 * gamma_bar - c_km1 * alpha
        };

        // Qₖ annihilates βₖ₊₁.
        let (c_k, s_k, lambda_k) = sym_givens(lambda_bar, beta_next);
        let zeta_k = c_k * zeta_bar;
        let zeta_bar_next = s_k * zeta_bar;

        // Extend Rₖ = Lₖ Pₖ.
        let (mut cp, mut sp) = (0.0, 0.0);
        let (mut cd, mut sd) = (0.0, 0.0);
        let mut mu_km2 = 0.0;
        let mut psi_km2 = 0.0;
        let mut rho_km2 = 0.0;
        let mu_bar_k;
        if iter == 1 {
            mu_bar_k = lambda_k;
        } else if iter == 2 {
            let (c, s, mu_bis) = sym_givens(mu_bar_km1, gamma_km1);
            (cp, sp) = (c, s);
            mu_bis_km1 = mu_bis;
            psi_bar_km1 = sp * lambda_k;
            mu_bar_k = -cp * lambda_k;
        } else {
            let (c, s, mu) = sym_givens(mu_bis_km2, epsilon_km2);
            (cp, sp, mu_km2) = (c, s, mu);
            psi_km2 = cp * psi_bar_km2 + sp * gamma_km1;
            let theta = sp * psi_bar_km2 - cp * gamma_km1;
            rho_km2 = sp * lambda_k;
            let eta = -cp * lambda_k;

            let (c, s, mu_bis) = sym_givens(mu_bar_km1, theta);
            (cd, sd) = (c, s);
            mu_bis_km1 = mu_bis;
            psi_bar_km1 = sd * eta;
            mu_bar_k = -cd * eta;
        }

        // Forward substitution on the last three rows of Lₖ.
        let mut tau_km2 = 0.0;
        if iter == 1 {
            tau_bar = guarded_div(zeta_k, mu_bar_k);
        } else if iter == 2 {
            tau_bis = guarded_div(zeta_km1, mu_bis_km1);
            xi_k = zeta_k;
            tau_bar = guarded_div(xi_k - psi_bar_km1 * tau_bis, mu_bar_k);
        } else {
            tau_km2 = guarded_div(tau_bis * mu_bis_km2, mu_km2);
            tau_bis = guarded_div(xi_km1 - psi_km2 * tau_km2, mu_bis_km1);
            xi_k = zeta_k - rho_km2 * tau_km2;
            tau_bar = guarded_div(xi_k - psi_bar_km1 * tau_bis, mu_bar_k);
        }

        // Directions Wₖ = Vₖ Pₖᵀ; wₖ₋₂ is final and enters x.
        let v = lanczos.current();
        if iter == 1 {
            copy(v, w.get_mut(0));
        } else if iter == 2 {
            let [w_bar, w_ring] = w.slots_mut();
            copy(w_bar.as_ref(), w_ring.as_mut());
            axpby(sp, v, cp, w_ring.as_mut());
            axpby(-cp, v, sp, w_bar.as_mut());
        } else {
            {
                let [w_bar, w_ring] = w.slots_mut();
                axpy(cp * tau_km2, w_ring.as_ref(), x.as_mut());
                axpy(sp * tau_km2, v, x.as_mut());
                // ẘₖ₋₂ ← sp ẘₖ₋₂ - cp vₖ, then (w̄ₖ₋₁, ·) ← (ẘₖ₋₁, w̄ₖ)
                axpby(-cp, v, sp, w_ring.as_mut());
                reflect(cd, sd, w_bar.as_mut(), w_ring.as_mut());
            }
            // Named swap: slot 0 becomes w̄ₖ, slot 1 becomes ẘₖ₋₁.
            w.swap(0, 1);
        }

        // Estimates.
        let r_norm = zeta_bar_next.abs();
        let ar_norm = zeta_bar.abs() * (lambda_bar * lambda_bar + (c_km1 * beta_next).powi(2)).sqrt();
        if iter == 1 {
            ar_tol = params.atol + sqrt_eps * ar_norm;
        }
        stats.record_residual(r_norm);
        stats.record_a_residual(ar_norm);

        let anorm = anorm2.sqrt();
        let mu_bar_abs = mu_bar_k.abs();
        mu_max = mu_max.max(mu_bar_abs);
        mu_min = mu_min.min(mu_bar_abs);
        if iter >= 2 {
            mu_max = mu_max.max(mu_bis_km1);
            mu_min = mu_min.min(mu_bis_km1);
        }
        if iter >= 3 {
            mu_max = mu_max.max(mu_km2);
            mu_min = mu_min.min(mu_km2);
        }
        let acond = mu_max / mu_min;
        let backward = r_norm / (anorm * norm(x.as_ref()));

        log::trace!("{method}: iter {iter:>4} ‖r‖ = {r_norm:.6e} ‖Ar‖ = {ar_norm:.6e} κ = {acond:.3e}");

        let ill_cond_mach = 1.0 + 1.0 / acond <= 1.0;
        let ill_cond_lim = acond >= params.conlim;
        let solved = r_norm <= eps
            || 1.0 + r_norm <= 1.0
            || 1.0 + backward <= 1.0
            || (precond.is_none() && backward <= f64::EPSILON);
        let breakdown = beta_next <= btol;
        // An invariant Krylov subspace without a zero residual means `b` is not in
        // the range. The vanishing μ̄ₖ that comes with it is the rank deficiency the
        // LQ pass resolves, so it is not reported as ill-conditioning.
        let inconsistent = (ar_norm <= ar_tol && mu_bar_abs <= sqrt_eps) || (breakdown && !solved);
        let flags = Termination {
            breakdown: false,
            ill_conditioned: (ill_cond_mach || ill_cond_lim) && !inconsistent,
            solved_alternate: false,
            solved: solved && !inconsistent,
            inconsistent,
            tired: iter >= itmax,
        };

        stats.anorm = anorm;
        stats.acond = acond;

        // Shift the windows of scalars.
        if iter >= 2 {
            (c_km2, s_km2) = (c_km1, s_km1);
            xi_km1 = xi_k;
            mu_bis_km2 = mu_bis_km1;
            psi_bar_km2 = psi_bar_km1;
        }
        (c_km1, s_km1) = (c_k, s_k);
        mu_bar_km1 = mu_bar_k;
        zeta_km1 = zeta_k;
        zeta_bar = zeta_bar_next;

        if let Some(outcome) = flags.outcome() {
            let status = match outcome {
                Outcome::IllConditioned if !ill_cond_mach => "condition number exceeds tolerance",
                other => other.default_status(),
            };
            break (outcome, status);
        }
        lanczos.advance();
    };

    // Complete x with the directions still pending in the window.
    if iter >= 2 {
        axpy(tau_bis, w.get(1), x.as_mut());
    }
    if outcome != Outcome::Inconsistent {
        axpy(tau_bar, w.get(0), x.as_mut());
    }
    if let Some(x0) = x0 {
        axpy(1.0, x0, x.as_mut());
    }

    stats.finish(iter, outcome, status);
    Ok(KrylovSolution { x, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{dyn_stack::MemBuffer, mat, prelude::Solve};

    fn run(
        a: &Mat<f64>,
        b: &Mat<f64>,
        params: &KrylovParams,
    ) -> Result<KrylovSolution, KrylovError> {
        let op = a.as_ref();
        let mut mem = MemBuffer::new(minres_qlp_scratch(&op, None, Par::Seq));
        minres_qlp(&op, b.as_ref(), None, None, params, Par::Seq, MemStack::new(&mut mem))
    }

    #[test]
    fn test_spd_system() {
        let a: Mat<f64> = mat![[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]];
        let b: Mat<f64> = mat![[1.0], [2.0], [3.0]];
        let params = KrylovParams {
            atol: 1e-12,
            rtol: 1e-12,
            ..Default::default()
        };
        let sol = run(&a, &b, &params).unwrap();
        assert!(sol.stats.solved);
        assert_eq!(sol.stats.outcome, Outcome::Solved);
        assert!(sol.stats.niter <= 3);
        let exact = a.partial_piv_lu().solve(&b);
        assert!((&sol.x - &exact).norm_l2() < 1e-10);
    }

    #[test]
    fn test_symmetric_indefinite_system() {
        let a: Mat<f64> = mat![
            [2.0, 1.0, 0.0, 0.0],
            [1.0, -3.0, 1.0, 0.0],
            [0.0, 1.0, 1.0, 2.0],
            [0.0, 0.0, 2.0, -1.0]
        ];
        let b: Mat<f64> = mat![[1.0], [0.0], [-1.0], [2.0]];
        let params = KrylovParams {
            atol: 1e-12,
            rtol: 1e-12,
            ..Default::default()
        };
        let sol = run(&a, &b, &params).unwrap();
        assert!(sol.stats.solved, "{}", sol.stats.status);
        let exact = a.partial_piv_lu().solve(&b);
        assert!((&sol.x - &exact).norm_l2() < 1e-9);
    }

    #[test]
    fn test_singular_inconsistent_returns_minimum_length_least_squares() {
        // diag(1, 2, 0) with b having a component in the null space.
        let a: Mat<f64> = mat![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 0.0]];
        let b: Mat<f64> = mat![[1.0], [1.0], [1.0]];
        let sol = run(&a, &b, &KrylovParams::default()).unwrap();
        assert!(sol.stats.inconsistent, "{}", sol.stats.status);
        assert_eq!(sol.stats.outcome, Outcome::Inconsistent);
        let expected: Mat<f64> = mat![[1.0], [0.5], [0.0]];
        assert!((&sol.x - &expected).norm_l2() < 1e-8);
    }

    #[test]
    fn test_shifted_system() {
        let a: Mat<f64> = mat![[1.0, 0.5], [0.5, 2.0]];
        let b: Mat<f64> = mat![[1.0], [1.0]];
        let params = KrylovParams {
            lambda: 3.0,
            atol: 1e-12,
            rtol: 1e-12,
            ..Default::default()
        };
        let sol = run(&a, &b, &params).unwrap();
        let shifted: Mat<f64> = mat![[4.0, 0.5], [0.5, 5.0]];
        let exact = shifted.partial_piv_lu().solve(&b);
        assert!((&sol.x - &exact).norm_l2() < 1e-10);
    }

    #[test]
    fn test_zero_rhs_short_circuits() {
        let a: Mat<f64> = mat![[2.0, 0.0], [0.0, 1.0]];
        let b = Mat::<f64>::zeros(2, 1);
        let sol = run(&a, &b, &KrylovParams::default()).unwrap();
        assert_eq!(sol.stats.niter, 0);
        assert_eq!(sol.stats.status, "x = 0 is a zero-residual solution");
        assert_eq!(sol.x, Mat::<f64>::zeros(2, 1));
    }

    #[test]
    fn test_rejects_non_square_operator() {
        let a = Mat::<f64>::zeros(3, 2);
        let b = Mat::<f64>::zeros(3, 1);
        let err = run(&a, &b, &KrylovParams::default()).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }
}
