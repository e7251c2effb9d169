//! Solver seam
//!
//! The optimization algorithm lives outside the coordination layer. A
//! compute process only asks it two things: the serialized current best
//! candidate, and whether it considers its work finished. The bytes stay
//! opaque all the way to whoever finally consumes them.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// The algorithm behind a compute process
pub trait Solver: Send {
    /// Serialized current best candidate
    fn best_result(&mut self) -> crate::Result<Vec<u8>>;

    /// Whether the algorithm has finished its search
    fn finished(&mut self) -> bool;
}

/// Candidate payload served by [`DemoSolver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoCandidate {
    pub objective: f64,
    pub tour: Vec<u32>,
}

impl Default for DemoCandidate {
    fn default() -> Self {
        Self {
            objective: 0.0,
            tour: Vec::new(),
        }
    }
}

/// Solver that declares itself finished after a fixed duration
///
/// Stands in for a real algorithm in the demo binary and in tests. The
/// candidate it serves is fixed; only the finish time is simulated.
pub struct DemoSolver {
    started: Instant,
    solve_after: Duration,
    candidate: DemoCandidate,
}

impl DemoSolver {
    pub fn new(solve_after: Duration) -> Self {
        Self {
            started: Instant::now(),
            solve_after,
            candidate: DemoCandidate::default(),
        }
    }

    pub fn with_candidate(mut self, candidate: DemoCandidate) -> Self {
        self.candidate = candidate;
        self
    }
}

impl Solver for DemoSolver {
    fn best_result(&mut self) -> crate::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&self.candidate)?)
    }

    fn finished(&mut self) -> bool {
        self.started.elapsed() >= self.solve_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_solver_finishes_after_its_deadline() {
        let mut immediate = DemoSolver::new(Duration::ZERO);
        assert!(immediate.finished());

        let mut never = DemoSolver::new(Duration::from_secs(3600));
        assert!(!never.finished());
    }

    #[test]
    fn test_demo_solver_serves_its_candidate() {
        let candidate = DemoCandidate {
            objective: 12.5,
            tour: vec![0, 2, 1],
        };
        let mut solver = DemoSolver::new(Duration::ZERO).with_candidate(candidate.clone());

        let bytes = solver.best_result().unwrap();
        let decoded: DemoCandidate = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, candidate);
    }
}
