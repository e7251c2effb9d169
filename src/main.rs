//! optiswarm CLI entry point

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use optiswarm::compute::solver::{DemoCandidate, DemoSolver};
use optiswarm::compute::ComputeProcess;
use optiswarm::config::cli::{Cli, RunMode};
use optiswarm::config::{toml, Config, ProbeType};
use optiswarm::coordinator::peers::{self, PROBE_TIMEOUT};
use optiswarm::coordinator::{BarrierSnapshot, BestCell, TransversalCoordinator};
use optiswarm::exchange::load::{LoadProbe, ScriptedProbe, SystemProbe};
use optiswarm::exchange::ExchangeProcess;
use optiswarm::report::RunReport;
use optiswarm::runtime::{id, Platform, ProcessHandle, ProcessId};
use optiswarm::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("optiswarm v{}", env!("CARGO_PKG_VERSION"));
    println!("Coordination layer for a migratory compute pool");
    println!();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    config.validate().context("Configuration validation failed")?;
    print!("{}", config);
    println!();

    match cli.mode {
        RunMode::Swarm => run_swarm(&cli, &config),
        RunMode::Coordinator => run_coordinator_only(&cli, &config),
    }
}

/// Load the TOML file if one was named, then apply CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config.as_deref() {
        Some(path) => toml::parse_toml_file(path)?,
        None => Config::default(),
    };
    Ok(toml::merge_cli_with_config(cli, config))
}

fn build_probe(config: &Config) -> Box<dyn LoadProbe> {
    match config.swarm.probe {
        ProbeType::System => Box::new(SystemProbe::new()),
        ProbeType::Scripted => Box::new(ScriptedProbe::new(&config.swarm.load_samples)),
    }
}

/// Probe the configured peers and build the coordinator's identity
fn coordinator_id(config: &Config) -> ProcessId {
    let mut id = ProcessId::new("coordinator");
    for url in peers::reachable_addresses(&config.peers, PROBE_TIMEOUT) {
        id.push_address(url);
    }
    id
}

/// Run the full demo swarm: one coordinator plus N compute/exchange pairs
fn run_swarm(cli: &Cli, config: &Config) -> Result<()> {
    let started = Instant::now();
    let platform = Platform::new(config.platform.name.clone(), config.platform.nodes.clone());
    let home = platform.nodes()[0].clone();
    let itinerary = config.itinerary();

    let coordinator_id = coordinator_id(config);
    let best: BestCell = Arc::new(Mutex::new(None));
    let coordinator = TransversalCoordinator::new(coordinator_id.clone(), Arc::clone(&best));
    let snapshot = coordinator.snapshot_handle();
    let coordinator_handle = platform.spawn(Box::new(coordinator), &home)?;

    // Computes go first so every relocation order finds its addressee.
    let mut workers = Vec::new();
    for index in 0..config.swarm.workers {
        let solver = DemoSolver::new(config.solver.solve_after()).with_candidate(DemoCandidate {
            objective: config.solver.objective,
            tour: (0..config.solver.tour_len as u32).collect(),
        });
        let compute = ComputeProcess::new(
            ProcessId::new(id::compute_name(index)),
            coordinator_id.clone(),
            Box::new(solver),
        )?;
        workers.push(platform.spawn(Box::new(compute), &home)?);
    }
    for index in 0..config.swarm.workers {
        let exchange = ExchangeProcess::new(
            ProcessId::new(id::exchange_name(index)),
            itinerary.clone(),
            config.swarm.load_threshold,
            build_probe(config),
        )?
        .with_sample_period(config.swarm.sample_period());
        workers.push(platform.spawn(Box::new(exchange), &home)?);
    }

    // The best-result assignment arrives from outside the protocol.
    let best_name = id::compute_name(config.swarm.best_worker);
    info!(best = %best_name, "privileged worker assigned");
    *best.lock().unwrap() = Some(ProcessId::new(best_name));

    wait_for_drain(&workers, Duration::from_secs(cli.duration));

    for handle in &workers {
        handle.request_stop();
    }
    for handle in workers {
        join_logged(handle);
    }
    coordinator_handle.request_stop();
    join_logged(coordinator_handle);

    finish(cli, config.swarm.workers, &platform, &snapshot, started)
}

/// Run only the coordinator, for workers driven from elsewhere
fn run_coordinator_only(cli: &Cli, config: &Config) -> Result<()> {
    let started = Instant::now();
    let platform = Platform::new(config.platform.name.clone(), config.platform.nodes.clone());
    let home = platform.nodes()[0].clone();

    let coordinator_id = coordinator_id(config);
    let best: BestCell = Arc::new(Mutex::new(None));
    let coordinator = TransversalCoordinator::new(coordinator_id, Arc::clone(&best));
    let snapshot = coordinator.snapshot_handle();
    let handle = platform.spawn(Box::new(coordinator), &home)?;

    info!(seconds = cli.duration, "coordinator running, awaiting external workers");
    std::thread::sleep(Duration::from_secs(cli.duration));

    handle.request_stop();
    join_logged(handle);

    finish(cli, 0, &platform, &snapshot, started)
}

/// Block until every worker thread finished or the run cap expires
fn wait_for_drain(workers: &[ProcessHandle], cap: Duration) {
    let deadline = Instant::now() + cap;
    while Instant::now() < deadline {
        if workers.iter().all(|handle| handle.is_finished()) {
            info!("worker pool drained");
            return;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    warn!("run cap reached before the pool drained");
}

fn join_logged(handle: ProcessHandle) {
    let name = handle.name().to_string();
    if let Err(err) = handle.join() {
        warn!(process = %name, error = %err, "process ended with an error");
    }
}

fn finish(
    cli: &Cli,
    workers: usize,
    platform: &Platform,
    snapshot: &Arc<Mutex<BarrierSnapshot>>,
    started: Instant,
) -> Result<()> {
    let snapshot = snapshot.lock().unwrap().clone();
    let report = RunReport::collect(platform, &snapshot, workers, started.elapsed());
    report.print();
    if let Some(path) = cli.report.as_deref() {
        report.write_json(path)?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}
