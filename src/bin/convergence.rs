//! Experiment Runner for the Convergence History of the Krylov solvers.
//!
//! This executable builds a random banded test problem for each requested method,
//! runs the solver with residual history enabled and writes one CSV row per
//! iteration. The symmetric and nonsymmetric methods get square operators, while
//! LSQR and TriCG get a rectangular one.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use faer::{
    Mat, Par,
    dyn_stack::{MemBuffer, MemStack},
    sparse::{SparseColMat, Triplet},
};
use krylov_project::{
    KrylovParams, KrylovStats, Method, SqdShifts, bilq, bilq_scratch, lsqr, lsqr_scratch,
    minres_qlp, minres_qlp_scratch, tricg, tricg_scratch,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::PathBuf;

/// The solver whose convergence is recorded.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum MethodArg {
    MinresQlp,
    Bilq,
    Lsqr,
    Tricg,
}

impl From<MethodArg> for Method {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::MinresQlp => Method::MinresQlp,
            MethodArg::Bilq => Method::Bilq,
            MethodArg::Lsqr => Method::Lsqr,
            MethodArg::Tricg => Method::Tricg,
        }
    }
}

/// Command-line arguments for the convergence experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "convergence-runner",
    about = "Records the residual history of the Krylov solvers on random banded problems."
)]
struct ConvergenceArgs {
    /// Methods to run. All of them when omitted.
    #[clap(long, value_enum, num_args = 1..)]
    methods: Vec<MethodArg>,

    /// Number of columns of every test operator.
    #[clap(long, default_value_t = 500)]
    n: usize,

    /// Number of rows of the rectangular operator used by LSQR and TriCG.
    #[clap(long)]
    m: Option<usize>,

    /// Absolute stopping tolerance.
    #[clap(long, default_value_t = 1e-10)]
    atol: f64,

    /// Relative stopping tolerance.
    #[clap(long, default_value_t = 1e-10)]
    rtol: f64,

    /// Iteration budget. Zero selects the method's default.
    #[clap(long, default_value_t = 0)]
    itmax: usize,

    /// Let BiLQ finish at the BiCG point when it is the better one.
    #[clap(long)]
    transfer: bool,

    /// Seed of the random problem generator.
    #[clap(long, default_value_t = 42)]
    seed: u64,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the convergence CSV.
#[derive(Debug, Serialize)]
struct ConvergenceRecord {
    /// Display name of the solver.
    method: &'static str,
    /// Iteration index, zero for the initial residual.
    iteration: usize,
    /// Residual norm estimate after this iteration.
    residual: f64,
}

/// Assembles an `nrows x ncols` matrix with random entries on the main diagonal and
/// its two neighbours. The main diagonal is shifted by `diag_shift`.
fn random_banded(
    nrows: usize,
    ncols: usize,
    diag_shift: f64,
    symmetric: bool,
    rng: &mut StdRng,
) -> Result<SparseColMat<usize, f64>> {
    let mut triplets = Vec::with_capacity(3 * nrows.min(ncols) + 2);
    for j in 0..ncols {
        if j < nrows {
            triplets.push(Triplet::new(j, j, diag_shift + rng.random_range(-1.0..1.0)));
        }
        if j + 1 < nrows {
            let below = rng.random_range(-0.5..0.5);
            triplets.push(Triplet::new(j + 1, j, below));
            if symmetric && j + 1 < ncols {
                triplets.push(Triplet::new(j, j + 1, below));
            }
        }
        if !symmetric && j + 1 < ncols && j < nrows {
            triplets.push(Triplet::new(j, j + 1, rng.random_range(-0.5..0.5)));
        }
    }
    SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
        .map_err(|e| anyhow!("failed to assemble the test operator: {e:?}"))
}

/// Builds the problem suited to `method` and solves it, returning the statistics.
fn run_method(
    method: Method,
    args: &ConvergenceArgs,
    params: &KrylovParams,
    rng: &mut StdRng,
) -> Result<KrylovStats> {
    let n = args.n;
    let m = args.m.unwrap_or(n + n / 2);

    let stats = match method {
        Method::MinresQlp => {
            // Indefinite spectrum around zero.
            let a = random_banded(n, n, 0.0, true, rng)?;
            let b = Mat::from_fn(n, 1, |_, _| rng.random::<f64>());
            let op = a.as_ref();
            let mut mem = MemBuffer::new(minres_qlp_scratch(&op, None, Par::Seq));
            let stack = MemStack::new(&mut mem);
            minres_qlp(&op, b.as_ref(), None, None, params, Par::Seq, stack)?.stats
        }
        Method::Bilq => {
            let a = random_banded(n, n, 2.0, false, rng)?;
            let b = Mat::from_fn(n, 1, |_, _| rng.random::<f64>());
            let op = a.as_ref();
            let mut mem = MemBuffer::new(bilq_scratch(&op, Par::Seq));
            let stack = MemStack::new(&mut mem);
            bilq(&op, b.as_ref(), b.as_ref(), None, params, Par::Seq, stack)?.stats
        }
        Method::Lsqr => {
            let a = random_banded(m, n, 1.0, false, rng)?;
            let b = Mat::from_fn(m, 1, |_, _| rng.random::<f64>());
            let op = a.as_ref();
            let mut mem = MemBuffer::new(lsqr_scratch(&op, None, None, Par::Seq));
            let stack = MemStack::new(&mut mem);
            lsqr(&op, b.as_ref(), None, None, None, params, Par::Seq, stack)?.stats
        }
        Method::Tricg => {
            let a = random_banded(m, n, 1.0, false, rng)?;
            let b = Mat::from_fn(m, 1, |_, _| rng.random::<f64>());
            let c = Mat::from_fn(n, 1, |_, _| rng.random::<f64>());
            let op = a.as_ref();
            let mut mem = MemBuffer::new(tricg_scratch(&op, None, None, Par::Seq));
            let stack = MemStack::new(&mut mem);
            tricg(
                &op,
                b.as_ref(),
                c.as_ref(),
                None,
                None,
                SqdShifts::default(),
                None,
                params,
                Par::Seq,
                stack,
            )?
            .stats
        }
    };
    Ok(stats)
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init()?;
    let args = ConvergenceArgs::parse();

    let methods: Vec<Method> = if args.methods.is_empty() {
        Method::ALL.to_vec()
    } else {
        args.methods.iter().map(|&m| m.into()).collect()
    };
    let params = KrylovParams {
        atol: args.atol,
        rtol: args.rtol,
        itmax: args.itmax,
        transfer_to_alternate: args.transfer,
        history: true,
        ..Default::default()
    };
    log::info!("Starting convergence experiment for {methods:?} with n = {}", args.n);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut results = Vec::new();
    for method in methods {
        let stats = run_method(method, &args, &params, &mut rng)?;
        log::info!(
            "{method}: {:?} after {} iterations ({})",
            stats.outcome,
            stats.niter,
            stats.status
        );
        results.extend(
            stats
                .residuals
                .iter()
                .enumerate()
                .map(|(iteration, &residual)| ConvergenceRecord {
                    method: method.name(),
                    iteration,
                    residual,
                }),
        );
    }

    log::info!("Writing results to {:?}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)?;
    for record in results {
        writer.serialize(record)?;
    }
    writer.flush()?;

    log::info!("Convergence experiment complete.");
    Ok(())
}
