//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Demo topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Full swarm (default): coordinator plus compute/exchange pairs
    Swarm,
    /// Coordinator only, for driving workers from elsewhere
    Coordinator,
}

/// optiswarm - coordination layer for a migratory compute pool
#[derive(Parser, Debug)]
#[command(name = "optiswarm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: swarm or coordinator
    #[arg(long, value_enum, default_value = "swarm")]
    pub mode: RunMode,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Swarm Options ===
    /// Number of compute/exchange pairs
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Relocation threshold in percent (0-100)
    #[arg(long)]
    pub load_threshold: Option<i64>,

    /// Comma-separated node itinerary (e.g. "n1,n2,n3")
    #[arg(long)]
    pub itinerary: Option<String>,

    /// Milliseconds between load samples
    #[arg(long)]
    pub sample_period_ms: Option<u64>,

    /// Index of the worker privileged as best-result holder
    #[arg(long)]
    pub best_worker: Option<usize>,

    /// Milliseconds until the demo solver reports finished
    #[arg(long)]
    pub solve_after_ms: Option<u64>,

    // === Run Options ===
    /// Run cap in seconds; the demo stops even if the pool stalls
    #[arg(short = 'd', long, default_value = "60")]
    pub duration: u64,

    /// JSON report output path
    #[arg(long)]
    pub report: Option<PathBuf>,
}
