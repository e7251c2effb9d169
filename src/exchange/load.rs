//! Local load sampling
//!
//! The exchange process decides relocation from an integer load percentage
//! (0–100). The system probe reads /proc/loadavg and normalizes the
//! one-minute average by the core count; where /proc is unavailable the
//! probe reports itself unsupported and the monitoring duty is skipped. A
//! scripted probe replays a fixed sample sequence for demos and tests.

use std::collections::VecDeque;
use std::fs;

use anyhow::Context;

/// Source of local load percentages
pub trait LoadProbe: Send {
    /// Whether this probe can sample on the current system
    fn available(&self) -> bool {
        true
    }

    /// Sample the local load as an integer percentage (0–100)
    fn sample(&mut self) -> crate::Result<u8>;
}

/// Probe backed by /proc/loadavg, normalized by core count
#[derive(Debug, Default)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }

    /// One-minute load average, or None where /proc is unavailable
    fn read_loadavg() -> Option<f64> {
        let text = fs::read_to_string("/proc/loadavg").ok()?;
        text.split_whitespace().next()?.parse().ok()
    }
}

impl LoadProbe for SystemProbe {
    fn available(&self) -> bool {
        Self::read_loadavg().is_some()
    }

    fn sample(&mut self) -> crate::Result<u8> {
        let load = Self::read_loadavg().context("failed to read /proc/loadavg")?;
        let cores = num_cpus::get().max(1);
        let percent = (load / cores as f64) * 100.0;
        Ok(percent.round().clamp(0.0, 100.0) as u8)
    }
}

/// Probe replaying a fixed sample sequence
///
/// Reports an idle machine (0) once the script is exhausted, so a scripted
/// spike triggers a bounded number of relocations.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    samples: VecDeque<u8>,
}

impl ScriptedProbe {
    pub fn new(samples: &[u8]) -> Self {
        Self {
            samples: samples.iter().copied().collect(),
        }
    }
}

impl LoadProbe for ScriptedProbe {
    fn sample(&mut self) -> crate::Result<u8> {
        Ok(self.samples.pop_front().unwrap_or(0))
    }
}
