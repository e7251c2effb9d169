//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::coordinator::peers::PeerConfig;
use crate::exchange::DEFAULT_LOAD_THRESHOLD;

/// Complete run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// Platform topology
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    /// Platform name; defaults to the local hostname
    #[serde(default = "default_platform_name")]
    pub name: String,
    /// Named execution nodes
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,
}

fn default_platform_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "optiswarm".to_string())
}

fn default_nodes() -> Vec<String> {
    vec!["n1".to_string(), "n2".to_string(), "n3".to_string()]
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: default_platform_name(),
            nodes: default_nodes(),
        }
    }
}

/// Worker pool shape and migration policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwarmConfig {
    /// Number of compute/exchange pairs
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Relocation threshold, integer percent (0-100)
    #[serde(default = "default_load_threshold")]
    pub load_threshold: i64,
    /// Node itinerary shared by the exchanges; empty means all platform nodes
    #[serde(default)]
    pub itinerary: Vec<String>,
    /// Milliseconds between load samples
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,
    /// Load probe selection
    #[serde(default)]
    pub probe: ProbeType,
    /// Sample script, used when probe = "scripted"
    #[serde(default)]
    pub load_samples: Vec<u8>,
    /// Index of the worker privileged as best-result holder
    #[serde(default)]
    pub best_worker: usize,
}

fn default_workers() -> usize {
    3
}

fn default_load_threshold() -> i64 {
    DEFAULT_LOAD_THRESHOLD
}

fn default_sample_period_ms() -> u64 {
    2000
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            load_threshold: default_load_threshold(),
            itinerary: Vec::new(),
            sample_period_ms: default_sample_period_ms(),
            probe: ProbeType::default(),
            load_samples: Vec::new(),
            best_worker: 0,
        }
    }
}

impl SwarmConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }
}

/// Load probe selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    /// Normalized one-minute load average from the OS
    System,
    /// Replay of the configured sample script
    Scripted,
}

impl Default for ProbeType {
    fn default() -> Self {
        Self::System
    }
}

/// Demo solver tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    /// Milliseconds until the demo solver reports finished
    #[serde(default = "default_solve_after_ms")]
    pub solve_after_ms: u64,
    /// Objective value the demo solver serves
    #[serde(default = "default_objective")]
    pub objective: f64,
    /// Tour length of the served candidate
    #[serde(default = "default_tour_len")]
    pub tour_len: usize,
}

fn default_solve_after_ms() -> u64 {
    3000
}

fn default_objective() -> f64 {
    42.0
}

fn default_tour_len() -> usize {
    8
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solve_after_ms: default_solve_after_ms(),
            objective: default_objective(),
            tour_len: default_tour_len(),
        }
    }
}

impl SolverConfig {
    pub fn solve_after(&self) -> Duration {
        Duration::from_millis(self.solve_after_ms)
    }
}

impl Config {
    /// Effective exchange itinerary: the configured one, or every platform node
    pub fn itinerary(&self) -> Vec<String> {
        if self.swarm.itinerary.is_empty() {
            self.platform.nodes.clone()
        } else {
            self.swarm.itinerary.clone()
        }
    }
}

// Display trait implementations

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(
            f,
            "  Platform: {} with nodes [{}]",
            self.platform.name,
            self.platform.nodes.join(", ")
        )?;
        writeln!(f, "  Swarm: {}", self.swarm)?;
        writeln!(
            f,
            "  Solver: finishes after {}ms, objective {}, tour length {}",
            self.solver.solve_after_ms, self.solver.objective, self.solver.tour_len
        )?;
        writeln!(f, "  Peers: {} configured", self.peers.len())?;
        Ok(())
    }
}

impl fmt::Display for SwarmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} worker pair(s), threshold {}%, probe {}, sample period {}ms, best worker {}",
            self.workers, self.load_threshold, self.probe, self.sample_period_ms, self.best_worker
        )?;
        if !self.itinerary.is_empty() {
            write!(f, ", itinerary [{}]", self.itinerary.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeType::System => write!(f, "system"),
            ProbeType::Scripted => write!(f, "scripted"),
        }
    }
}

// Validation

impl Config {
    /// Validate the complete configuration, reporting every problem at once
    pub fn validate(&self) -> crate::Result<()> {
        let mut errors = Vec::new();

        if self.platform.nodes.is_empty() {
            errors.push("platform.nodes must name at least one node".to_string());
        }
        if self.swarm.workers == 0 {
            errors.push("swarm.workers must be greater than 0".to_string());
        }
        if !(0..=100).contains(&self.swarm.load_threshold) {
            errors.push(format!(
                "swarm.load_threshold must be 0-100, got {}",
                self.swarm.load_threshold
            ));
        }
        if self.swarm.sample_period_ms == 0 {
            errors.push("swarm.sample_period_ms must be greater than 0".to_string());
        }
        if self.swarm.best_worker >= self.swarm.workers && self.swarm.workers > 0 {
            errors.push(format!(
                "swarm.best_worker {} is out of range for {} worker(s)",
                self.swarm.best_worker, self.swarm.workers
            ));
        }
        if self.swarm.probe == ProbeType::Scripted && self.swarm.load_samples.is_empty() {
            errors.push("swarm.probe = \"scripted\" needs a non-empty swarm.load_samples".to_string());
        }
        for node in &self.swarm.itinerary {
            if !self.platform.nodes.contains(node) {
                errors.push(format!(
                    "itinerary node {} is not in platform.nodes",
                    node
                ));
            }
        }
        for peer in &self.peers {
            if peer.host.is_empty() {
                errors.push(format!("peer {} has an empty host", peer.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n  - {}", errors.join("\n  - "))
        }
    }
}
