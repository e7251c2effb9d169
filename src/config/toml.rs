//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config =
        ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Config {
    if let Some(workers) = cli.workers {
        config.swarm.workers = workers;
    }
    if let Some(threshold) = cli.load_threshold {
        config.swarm.load_threshold = threshold;
    }
    if let Some(ref itinerary) = cli.itinerary {
        config.swarm.itinerary = itinerary
            .split(',')
            .map(|node| node.trim().to_string())
            .filter(|node| !node.is_empty())
            .collect();
    }
    if let Some(period) = cli.sample_period_ms {
        config.swarm.sample_period_ms = period;
    }
    if let Some(best) = cli.best_worker {
        config.swarm.best_worker = best;
    }
    if let Some(after) = cli.solve_after_ms {
        config.solver.solve_after_ms = after;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_parse_toml_basic() {
        let toml = r#"
[platform]
name = "lab"
nodes = ["n1", "n2"]

[swarm]
workers = 2
load_threshold = 45
itinerary = ["n1", "n2"]
probe = "scripted"
load_samples = [10, 45]
best_worker = 1

[solver]
solve_after_ms = 500

[[peers]]
name = "alpha"
host = "10.0.0.5"

[[peers]]
name = "beta"
host = "10.0.0.6"
port = 8800
"#;

        let config = parse_toml_string(toml).unwrap();
        assert_eq!(config.platform.name, "lab");
        assert_eq!(config.platform.nodes, vec!["n1", "n2"]);
        assert_eq!(config.swarm.workers, 2);
        assert_eq!(config.swarm.load_threshold, 45);
        assert_eq!(config.swarm.probe, ProbeType::Scripted);
        assert_eq!(config.swarm.load_samples, vec![10, 45]);
        assert_eq!(config.swarm.best_worker, 1);
        assert_eq!(config.solver.solve_after_ms, 500);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[0].port, 7778);
        assert_eq!(config.peers[1].port, 8800);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_toml_empty_uses_defaults() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config.swarm.workers, 3);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_parse_toml_rejects_unknown_fields() {
        assert!(parse_toml_string("[swarm]\nworker_count = 3\n").is_err());
    }

    #[test]
    fn test_parse_toml_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[swarm]\nworkers = 4\n").unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.swarm.workers, 4);
    }

    #[test]
    fn test_parse_toml_file_missing() {
        let err = parse_toml_file(Path::new("/nonexistent/optiswarm.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let config = parse_toml_string("[swarm]\nworkers = 2\nload_threshold = 45\n").unwrap();
        let cli = Cli::try_parse_from([
            "optiswarm",
            "--workers",
            "5",
            "--itinerary",
            " n1 , n2 ",
        ])
        .unwrap();

        let merged = merge_cli_with_config(&cli, config);
        assert_eq!(merged.swarm.workers, 5);
        assert_eq!(merged.swarm.load_threshold, 45); // untouched by the CLI
        assert_eq!(merged.swarm.itinerary, vec!["n1", "n2"]);
    }
}
