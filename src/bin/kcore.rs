//! Iterative k-core decomposition over an external-memory graph.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ember::algs::kcore::{compute_kmax, run_kcore, KcoreProgram};
use ember::{ConfigMap, GraphEngine, Runtime};

#[derive(Parser, Debug)]
#[command(
    name = "kcore",
    version,
    about = "k-core decomposition over an external-memory graph"
)]
struct Cli {
    /// Configuration file (key=value lines).
    conf: PathBuf,

    /// Graph adjacency file.
    graph: PathBuf,

    /// Vertex index file.
    index: PathBuf,

    /// Smallest core to compute (at least 2).
    kmin: u32,

    /// Largest core to compute; defaults to the maximum vertex degree.
    kmax: Option<u32>,

    /// Extra configuration overrides, `key=value` separated by `;`.
    #[arg(short = 'c', value_name = "CONFS")]
    confs: Option<String>,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("kcore: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> ember::Result<()> {
    let mut configs = ConfigMap::from_file(&cli.conf)?;
    if let Some(confs) = &cli.confs {
        configs.add_options(confs)?;
    }
    let runtime = Runtime::init(&configs)?;
    if !runtime.config().prof_file.is_empty() {
        warn!(
            prof_file = %runtime.config().prof_file,
            "profiler support is not built in; prof_file ignored"
        );
    }

    let engine = GraphEngine::<KcoreProgram>::create(&runtime, &cli.graph, &cli.index)?;
    let kmax = match cli.kmax {
        Some(kmax) => kmax,
        None => {
            info!("kmax omitted, computing it as the maximum vertex degree");
            compute_kmax(&engine)?
        }
    };
    info!(kmin = cli.kmin, kmax, "starting k-core peeling");

    for outcome in run_kcore(&engine, cli.kmin, kmax)? {
        println!(
            "{}-core: {} vertices alive ({:.3}s)",
            outcome.k, outcome.alive, outcome.seconds
        );
    }

    if runtime.config().print_io_stat {
        let io = engine.io_stats();
        let cache = engine.cache_stats();
        println!(
            "io: {} requests, {} bytes; cache: {} hits, {} misses, {} evictions",
            io.requests, io.bytes_requested, cache.hits, cache.misses, cache.evictions
        );
    }
    Ok(())
}
