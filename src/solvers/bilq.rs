//! BiLQ for square nonsymmetric systems.
//!
//! The biorthogonal Lanczos process reduces `A` to a tridiagonal `Tₖ`, which is
//! factored from the right as `Tₖ = L̄ₖ Qₖ`. The LQ iterate `xᴸₖ₋₁ = Dₖ₋₁ zₖ₋₁`
//! minimizes nothing in particular but is cheap and stable; its residual is
//! estimated from `vₖ`, `vₖ₊₁` and the last factorization entries.
//!
//! The BiCG point `xᶜₖ = xᴸₖ₋₁ + ζ̄ₖ d̄ₖ` is reachable from the same direction
//! `d̄ₖ` at the cost of one `axpy`. With `transfer_to_alternate` set, its residual
//! `|ρₖ| ‖vₖ₊₁‖` is tracked and the solve ends on that point once it converges
//! and its estimate is below the LQ one. That switch is a heuristic: nothing
//! guarantees the BiCG estimate is reliable at the moment it is taken.

use super::{
    KrylovParams, KrylovSolution, KrylovStats, Method, Outcome, Termination, initial_residual,
    zero_residual_status,
};
use crate::{
    algorithms::{bilanczos::BiLanczos, sym_givens},
    error::{KrylovError, KrylovErrorKind, check_rows, check_square},
    matrix::{axpby, axpy, copy, norm},
};
use faer::{
    Mat, MatRef, Par,
    dyn_stack::{MemStack, StackReq},
    matrix_free::BiLinOp,
};

/// Computes the workspace required by [`bilq`].
pub fn bilq_scratch(operator: &impl BiLinOp<f64>, par: Par) -> StackReq {
    StackReq::any_of(&[
        operator.apply_scratch(1, par),
        operator.transpose_apply_scratch(1, par),
    ])
}

/// Solves the square system `A x = b` with BiLQ.
///
/// # Arguments
/// * `operator`: A square operator; `apply` and `transpose_apply` are used once per iteration.
/// * `b`: The right-hand side.
/// * `c`: The shadow vector starting the `Aᵀ` sequence. `⟨c, b - Ax₀⟩ = 0` ends the
///   call with [`Outcome::Breakdown`] before the first iteration.
/// * `x0`: Optional warm start.
/// * `params`: Tolerances, budget and `transfer_to_alternate`.
/// * `par`, `stack`: Parallelism and workspace, sized by [`bilq_scratch`].
pub fn bilq(
    operator: &impl BiLinOp<f64>,
    b: MatRef<'_, f64>,
    c: MatRef<'_, f64>,
    x0: Option<MatRef<'_, f64>>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<KrylovSolution, KrylovError> {
    implementation(operator, b, c, x0, params, par, stack)
}

fn implementation(
    a: &dyn BiLinOp<f64>,
    b: MatRef<'_, f64>,
    c: MatRef<'_, f64>,
    x0: Option<MatRef<'_, f64>>,
    params: &KrylovParams,
    par: Par,
    stack: &mut MemStack,
) -> Result<KrylovSolution, KrylovError> {
    params.validate()?;
    check_square(a.nrows(), a.ncols())?;
    let n = a.nrows();
    check_rows("b", n, b.nrows(), b.ncols())?;
    check_rows("c", n, c.nrows(), c.ncols())?;
    if let Some(x0) = x0 {
        check_rows("x0", n, x0.nrows(), x0.ncols())?;
    }

    let method = Method::Bilq;
    let itmax = params.resolve_itmax(method, n, n);
    let mut stats = KrylovStats::new(method, params);

    let r0 = initial_residual(a, b, x0, par, stack);
    let r0_norm = norm(r0.as_ref());
    stats.record_residual(r0_norm);

    let mut x = Mat::<f64>::zeros(n, 1);
    let finish_with_x0 = |x: &mut Mat<f64>| {
        if let Some(x0) = x0 {
            axpy(1.0, x0, x.as_mut());
        }
    };

    if r0_norm == 0.0 {
        finish_with_x0(&mut x);
        stats.finish(0, Outcome::Solved, zero_residual_status(x0.is_some()));
        return Ok(KrylovSolution { x, stats });
    }

    if norm(c) == 0.0 {
        return Err(KrylovErrorKind::InputError(
            "The shadow vector `c` must not be a zero vector.".to_string(),
        )
        .into());
    }

    let mut lanczos = BiLanczos::new(a);
    let cb = lanczos.start(r0.as_ref(), c);
    if cb == 0.0 {
        finish_with_x0(&mut x);
        stats.finish(0, Outcome::Breakdown, "Breakdown ⟨b, c⟩ = 0");
        return Ok(KrylovSolution { x, stats });
    }

    log::debug!(
        "{method}: n = {n}, ‖r₀‖ = {r0_norm:.3e}, ⟨c, r₀⟩ = {cb:.3e}, itmax = {itmax}, transfer = {}",
        params.transfer_to_alternate
    );

    let eps = params.atol + params.rtol * r0_norm;
    let mut d_bar = Mat::<f64>::zeros(n, 1);

    // Reflections Qₖ₋₁ and Qₖ of the LQ factorization.
    let (mut c_km1, mut s_km1) = (-1.0, 0.0);
    let (mut c_k, mut s_k);
    let mut delta_bar_km1 = 0.0;

    // Last components of z̄ₖ = L̄ₖ⁻¹ β₁ e₁.
    let mut zeta_km1 = 0.0;
    let mut zeta_km2;
    let mut eta = 0.0;
    let mut zeta_bar = 0.0;
    let mut norm_v = r0_norm / cb.abs().sqrt();

    let mut iter = 0;
    let outcome = loop {
        iter += 1;
        let step = lanczos.step(par, stack)?;
        let (alpha, beta, gamma) = (step.alpha, step.beta, step.gamma);
        let beta_next = step.beta_next;

        // Tₖ = L̄ₖ Qₖ, last row (ϵₖ₋₂, λₖ₋₁, δ̄ₖ).
        let mut epsilon_km2 = 0.0;
        let mut lambda_km1 = 0.0;
        let mut delta_km1 = 0.0;
        let delta_bar = if iter == 1 {
            (c_k, s_k) = (-1.0, 0.0);
            alpha
        } else {
            let (c, s, delta) = sym_givens(delta_bar_km1, gamma);
            (c_k, s_k, delta_km1) = (c, s, delta);
            if iter == 2 {
                lambda_km1 = c_k * beta + s_k * alpha;
                s_k * beta - c_k * alpha
            } else {
                epsilon_km2 = s_km1 * beta;
                lambda_km1 = -c_km1 * c_k * beta + s_k * alpha;
                -c_km1 * s_k * beta - c_k * alpha
            }
        };

        // Forward substitution for ζₖ₋₁, then ηₖ for the next one.
        zeta_km2 = zeta_km1;
        if iter == 1 {
            eta = beta;
        } else {
            zeta_km1 = eta / delta_km1;
            eta = -epsilon_km2 * zeta_km2 - lambda_km1 * zeta_km1;
        }

        // xᴸₖ₋₁ = xᴸₖ₋₂ + ζₖ₋₁ dₖ₋₁ with dₖ₋₁ = cₖ d̄ₖ₋₁ + sₖ vₖ.
        let v = lanczos.current_v();
        if iter >= 2 {
            axpy(zeta_km1 * c_k, d_bar.as_ref(), x.as_mut());
            axpy(zeta_km1 * s_k, v, x.as_mut());
            axpby(-c_k, v, s_k, d_bar.as_mut());
        } else {
            copy(v, d_bar.as_mut());
        }

        // ‖rᴸₖ‖ from vₖ, vₖ₊₁ and their inner product.
        let (vv_next, norm_v_next) = lanczos.next_v_geometry();
        let r_lq = if iter == 1 {
            r0_norm
        } else {
            let mu = beta * (s_km1 * zeta_km2 - c_km1 * c_k * zeta_km1) + alpha * s_k * zeta_km1;
            let omega = beta_next * s_k * zeta_km1;
            (mu * mu * norm_v * norm_v
                + omega * omega * norm_v_next * norm_v_next
                + 2.0 * mu * omega * vv_next)
                .abs()
                .sqrt()
        };
        stats.record_residual(r_lq);

        // ‖rᶜₖ‖ = |ρₖ| ‖vₖ₊₁‖
        let alternate_defined = params.transfer_to_alternate && delta_bar.abs() > f64::EPSILON;
        let r_cg = if alternate_defined {
            zeta_bar = eta / delta_bar;
            let rho = beta_next * (s_k * zeta_km1 - c_k * zeta_bar);
            rho.abs() * norm_v_next
        } else {
            f64::INFINITY
        };

        log::trace!("{method}: iter {iter:>4} ‖rᴸ‖ = {r_lq:.6e} ‖rᶜ‖ = {r_cg:.6e}");

        (c_km1, s_km1) = (c_k, s_k);
        delta_bar_km1 = delta_bar;
        norm_v = norm_v_next;

        let solved_lq = r_lq <= eps;
        let solved_cg = alternate_defined && r_cg <= eps;
        let flags = Termination {
            breakdown: !solved_lq && !solved_cg && step.pq == 0.0,
            ill_conditioned: false,
            solved_alternate: solved_cg && (!solved_lq || r_cg < r_lq),
            solved: solved_lq,
            inconsistent: false,
            tired: iter >= itmax,
        };
        if let Some(outcome) = flags.outcome() {
            break outcome;
        }
        lanczos.advance();
    };

    if outcome == Outcome::SolvedAlternate {
        axpy(zeta_bar, d_bar.as_ref(), x.as_mut());
    }
    finish_with_x0(&mut x);

    let status = match outcome {
        Outcome::Breakdown => "Breakdown ⟨uₖ₊₁, vₖ₊₁⟩ = 0",
        other => other.default_status(),
    };
    stats.finish(iter, outcome, status);
    Ok(KrylovSolution { x, stats })
}
