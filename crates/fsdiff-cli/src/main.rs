//! fsdiff: run a differential test session over two directory roots.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fsdiff_engine::{AdminEndpoint, EngineConfig, EngineError, Session};

#[derive(Parser, Debug)]
#[command(name = "fsdiff", version, about = "Differential filesystem exerciser")]
struct Args {
    /// First root directory (usually the filesystem under test).
    root_a: PathBuf,

    /// Second root directory (usually the reference).
    root_b: PathBuf,

    /// Seed for the randomized operation sequence.
    #[arg(long, default_value_t = 0, env = "FSDIFF_SEED")]
    seed: u64,

    /// Number of operations to run.
    #[arg(long, default_value_t = 50)]
    steps: usize,

    /// Wall-clock budget in seconds; the run stops early when exhausted.
    #[arg(long)]
    max_runtime: Option<u64>,

    /// Operation names to skip (repeatable).
    #[arg(long = "exclude", value_name = "OP")]
    exclude_ops: Vec<String>,

    /// Restrict selection to exactly these operations (repeatable).
    #[arg(long = "include", value_name = "OP")]
    include_ops: Vec<String>,

    /// Keep existing root contents instead of cleaning at startup.
    #[arg(long)]
    keep_roots: bool,

    /// Create the simulated OS users and groups at startup (root only).
    #[arg(long)]
    provision_users: bool,

    /// Record the per-root operation logs under this directory.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Run without comparing: every step is accepted, useful for seeding.
    #[arg(long)]
    generate_baseline: bool,

    /// Admin binary driving root A (requires the matching meta URL).
    #[arg(long, requires_all = ["meta_a", "admin_b", "meta_b"])]
    admin_a: Option<PathBuf>,

    /// Meta address for root A's admin binary.
    #[arg(long)]
    meta_a: Option<String>,

    /// Admin binary driving root B.
    #[arg(long)]
    admin_b: Option<PathBuf>,

    /// Meta address for root B's admin binary.
    #[arg(long)]
    meta_b: Option<String>,
}

impl Args {
    fn into_config(self) -> EngineConfig {
        let mut cfg = EngineConfig::new(self.root_a, self.root_b);
        cfg.seed = self.seed;
        cfg.steps = self.steps;
        cfg.max_runtime_secs = self.max_runtime;
        if !self.exclude_ops.is_empty() {
            cfg.exclude_ops = self.exclude_ops;
        }
        cfg.include_ops = self.include_ops;
        cfg.clean_roots = !self.keep_roots;
        cfg.provision_users = self.provision_users;
        cfg.log_dir = self.log_dir;
        cfg.generate_baseline = self.generate_baseline;
        if let (Some(binary), Some(meta_url)) = (self.admin_a, self.meta_a) {
            cfg.admin_a = Some(AdminEndpoint { binary, meta_url });
        }
        if let (Some(binary), Some(meta_url)) = (self.admin_b, self.meta_b) {
            cfg.admin_b = Some(AdminEndpoint { binary, meta_url });
        }
        cfg
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<EngineError>() {
                Some(e) if e.is_divergence() => tracing::error!("{e}"),
                _ => tracing::error!("{err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let seed = args.seed;
    let cfg = args.into_config();
    let mut session = Session::new(cfg).context("session setup failed")?;
    let outcome = session.run();
    println!("{}", session.report());
    tracing::info!(
        seed,
        steps = session.steps_run(),
        ops = session.stats().total_steps(),
        "session finished"
    );
    outcome.map_err(Into::into)
}
