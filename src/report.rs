//! Run report assembly and rendering
//!
//! Collected once at the end of a run from the platform and the
//! coordinator's published barrier snapshot. Result bytes stay opaque; the
//! report only states whether they were captured and how many there are.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::coordinator::BarrierSnapshot;
use crate::runtime::id;
use crate::runtime::Platform;

/// Final state of one compute/exchange pair
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub compute: String,
    pub exchange: String,
    pub compute_node: Option<String>,
    pub exchange_node: Option<String>,
    pub released: bool,
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp: String,
    pub platform: String,
    pub nodes: usize,
    pub duration_secs: f64,
    pub workers: Vec<WorkerReport>,
    pub released: usize,
    pub best: Option<String>,
    pub result_captured: bool,
    pub result_bytes: usize,
    pub relocations: u64,
}

impl RunReport {
    /// Assemble the report from the platform and the barrier snapshot
    pub fn collect(
        platform: &Platform,
        snapshot: &BarrierSnapshot,
        workers: usize,
        elapsed: Duration,
    ) -> Self {
        let workers = (0..workers)
            .map(|index| {
                let compute = id::compute_name(index);
                let exchange = id::exchange_name(index);
                WorkerReport {
                    compute_node: platform.location_of(&compute),
                    exchange_node: platform.location_of(&exchange),
                    released: snapshot.released.iter().any(|name| name == &compute),
                    compute,
                    exchange,
                }
            })
            .collect();

        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            platform: platform.name().to_string(),
            nodes: platform.nodes().len(),
            duration_secs: elapsed.as_secs_f64(),
            workers,
            released: snapshot.released.len(),
            best: snapshot.best.clone(),
            result_captured: snapshot.result.is_some(),
            result_bytes: snapshot.result.as_ref().map_or(0, |bytes| bytes.len()),
            relocations: platform.relocation_count(),
        }
    }

    /// Print the report to the console
    pub fn print(&self) {
        println!("═══════════════════════════════════════════════════════════");
        println!("                       RUN REPORT");
        println!("═══════════════════════════════════════════════════════════");
        println!();
        println!("Platform: {} ({} node(s))", self.platform, self.nodes);
        println!("Elapsed:  {:.2}s", self.duration_secs);
        println!();

        println!("Workers:");
        for worker in &self.workers {
            println!(
                "  {} @ {}{}  /  {} @ {}",
                worker.compute,
                worker.compute_node.as_deref().unwrap_or("?"),
                if worker.released { " (released)" } else { "" },
                worker.exchange,
                worker.exchange_node.as_deref().unwrap_or("?"),
            );
        }
        println!();

        println!("Barrier:");
        println!("  Released:    {} / {}", self.released, self.workers.len());
        println!("  Best:        {}", self.best.as_deref().unwrap_or("unassigned"));
        if self.result_captured {
            println!("  Result:      captured ({} bytes)", self.result_bytes);
        } else {
            println!("  Result:      not captured");
        }
        println!("  Relocations: {}", self.relocations);
        println!();
        println!("═══════════════════════════════════════════════════════════");
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> crate::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Platform;

    fn snapshot() -> BarrierSnapshot {
        BarrierSnapshot {
            released: vec!["compute-1".to_string(), "compute-0".to_string()],
            result: Some(b"encoded".to_vec()),
            best: Some("compute-0".to_string()),
        }
    }

    #[test]
    fn test_collect_reads_locations_and_barrier_state() {
        let platform = Platform::new("lab", vec!["n1".to_string(), "n2".to_string()]);
        {
            let _a = platform.attach(crate::runtime::ProcessId::new("compute-0"), "n2").unwrap();
            let _b = platform.attach(crate::runtime::ProcessId::new("exchange-0"), "n2").unwrap();
        }

        let report = RunReport::collect(&platform, &snapshot(), 2, Duration::from_secs(4));
        assert_eq!(report.platform, "lab");
        assert_eq!(report.workers.len(), 2);
        assert_eq!(report.workers[0].compute_node.as_deref(), Some("n2"));
        assert!(report.workers[0].released);
        assert!(report.workers[1].compute_node.is_none());
        assert!(report.workers[1].released);
        assert_eq!(report.released, 2);
        assert!(report.result_captured);
        assert_eq!(report.result_bytes, 7);
        assert_eq!(report.best.as_deref(), Some("compute-0"));
    }

    #[test]
    fn test_write_json_produces_a_readable_file() {
        let platform = Platform::new("lab", vec!["n1".to_string()]);
        let report = RunReport::collect(&platform, &snapshot(), 1, Duration::from_secs(1));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        report.write_json(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["platform"], "lab");
        assert_eq!(value["released"], 2);
        assert_eq!(value["result_captured"], true);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
