//! Exchange process
//!
//! The per-worker migration authority. Each exchange process is paired 1:1
//! with a compute process derived by naming convention and keeps that pair
//! co-located. It samples local load on a fixed period; when a sample tops
//! its threshold it advances a cyclic node itinerary, relocates there, and
//! drags its pair along with a RELOCATE_ORDER. Discovery registration
//! follows the process around: deregister on departure, re-register on
//! arrival. The exchange never inspects results; its only part in shutdown
//! is reacting to the pair's forwarded completion signal.

pub mod load;

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::proto::{Envelope, Intent, MsgFilter, Opcode};
use crate::runtime::id::{self, EXCHANGE_PREFIX};
use crate::runtime::{Flow, Process, ProcessCtx, ProcessId, POLL_BACKOFF};
use crate::util::ValueSet;

use load::LoadProbe;

/// Service type exchange processes register under in discovery
pub const SERVICE_TYPE: &str = "exchange";

/// Default relocation threshold, integer percent
pub const DEFAULT_LOAD_THRESHOLD: i64 = 30;

/// Name of the threshold entry in the parameter set
pub const PARAM_LOAD_THRESHOLD: &str = "load_threshold";

/// Default period between load samples
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(2);

const TASK_MONITOR: usize = 0;
const TASK_COMPLETION: usize = 1;

const TASK_LABELS: &[&str] = &["monitor-load", "completion-listener"];

/// The exchange role: migration policy owner for one compute pair
pub struct ExchangeProcess {
    id: ProcessId,
    pair: ProcessId,
    params: ValueSet<i64>,
    itinerary: Vec<String>,
    index: usize,
    first_move: bool,
    probe: Box<dyn LoadProbe>,
    sample_period: Duration,
}

impl ExchangeProcess {
    /// Create an exchange process with its node itinerary and threshold
    pub fn new(
        id: ProcessId,
        itinerary: Vec<String>,
        threshold: i64,
        probe: Box<dyn LoadProbe>,
    ) -> crate::Result<Self> {
        if !id.name().starts_with(EXCHANGE_PREFIX) {
            anyhow::bail!("{} is not an exchange process name", id.name());
        }
        if itinerary.is_empty() {
            anyhow::bail!("{} has an empty itinerary", id.name());
        }
        let pair = id::pair_name(id.name())
            .map(ProcessId::new)
            .ok_or_else(|| anyhow::anyhow!("cannot derive pair of {}", id.name()))?;

        let mut params = ValueSet::new();
        params.set(PARAM_LOAD_THRESHOLD, Some(threshold));

        Ok(Self {
            id,
            pair,
            params,
            itinerary,
            index: 0,
            first_move: true,
            probe,
            sample_period: SAMPLE_PERIOD,
        })
    }

    /// Override the fixed sample period
    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    fn threshold(&self) -> i64 {
        self.params
            .get(PARAM_LOAD_THRESHOLD)
            .copied()
            .unwrap_or(DEFAULT_LOAD_THRESHOLD)
    }

    /// Sample load and relocate along the itinerary when it tops the threshold
    fn poll_monitor(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        if !self.probe.available() {
            info!("load probe unavailable on this system, monitoring disabled");
            return Ok(Flow::Done);
        }
        let load = match self.probe.sample() {
            Ok(load) => load,
            Err(err) => {
                warn!(error = %err, "load sample failed");
                return Ok(Flow::Idle(self.sample_period));
            }
        };

        let threshold = self.threshold();
        debug!(load, threshold, "load sampled");
        if i64::from(load) > threshold {
            let next = self.advance_itinerary();
            info!(load, threshold, to = %next, "load over threshold, relocating");
            ctx.request_relocate(next);
        }
        Ok(Flow::Idle(self.sample_period))
    }

    /// React to the pair's forwarded completion signal
    ///
    /// Only the paired compute process can retire this exchange; completion
    /// signals from anyone else are left unconsumed.
    fn poll_completion(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        let filter = MsgFilter::opcode(Opcode::Completion)
            .with_intent(Intent::Inform)
            .from_sender(self.pair.name());
        if ctx.poll_msg(&filter).is_none() {
            return Ok(Flow::Idle(POLL_BACKOFF));
        }

        info!(pair = %self.pair.name(), "pair released, retiring");
        self.deregister(ctx);
        ctx.request_stop();
        Ok(Flow::Done)
    }

    fn advance_itinerary(&mut self) -> String {
        self.index = (self.index + 1) % self.itinerary.len();
        self.itinerary[self.index].clone()
    }

    fn register(&mut self, ctx: &mut ProcessCtx<'_>) {
        match ctx.directory().register(SERVICE_TYPE, &self.id) {
            Ok(()) => info!("registered in discovery"),
            Err(err) => warn!(error = %err, "register failed"),
        }
    }

    fn deregister(&mut self, ctx: &mut ProcessCtx<'_>) {
        match ctx.directory().deregister(self.id.name()) {
            Ok(()) => info!("deregistered from discovery"),
            Err(err) => warn!(error = %err, "deregister failed"),
        }
    }
}

impl Process for ExchangeProcess {
    fn id(&self) -> &ProcessId {
        &self.id
    }

    fn task_labels(&self) -> &'static [&'static str] {
        TASK_LABELS
    }

    fn poll_task(&mut self, task: usize, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        match task {
            TASK_MONITOR => self.poll_monitor(ctx),
            TASK_COMPLETION => self.poll_completion(ctx),
            _ => Ok(Flow::Done),
        }
    }

    /// Departure: leave discovery, except on the very first move when the
    /// process was never registered
    fn before_relocate(&mut self, ctx: &mut ProcessCtx<'_>) {
        if self.first_move {
            debug!("first relocation, nothing to deregister");
        } else {
            self.deregister(ctx);
        }
    }

    /// Arrival: resync the itinerary if the landing differs from the plan,
    /// rejoin discovery, and order the pair to follow
    fn after_relocate(&mut self, ctx: &mut ProcessCtx<'_>, origin: &str, landed: &str) {
        self.first_move = false;

        if self.itinerary[self.index] != landed {
            match self.itinerary.iter().position(|n| n == landed) {
                Some(pos) => {
                    debug!(
                        expected = %self.itinerary[self.index],
                        landed,
                        "landing differs from plan, resyncing index"
                    );
                    self.index = pos;
                }
                None => warn!(landed, "landing node is not on the itinerary"),
            }
        }

        self.register(ctx);
        ctx.send(
            Envelope::new(Opcode::RelocateOrder, Intent::Inform, self.id.clone())
                .to(self.pair.clone())
                .with_encoding()
                .with_payload(landed),
        );
        info!(from = %origin, node = %landed, pair = %self.pair.name(), "arrived, pair ordered to follow");
    }

    fn on_stop(&mut self, ctx: &mut ProcessCtx<'_>) {
        if ctx.directory().is_registered(self.id.name()) {
            self.deregister(ctx);
        }
        info!("exchange process retiring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::solver::DemoSolver;
    use crate::compute::ComputeProcess;
    use crate::runtime::process::Control;
    use crate::runtime::{Mailbox, Platform};
    use load::ScriptedProbe;
    use std::sync::Arc;
    use std::time::Instant;

    fn platform() -> Arc<Platform> {
        Platform::new(
            "test",
            vec!["n1".to_string(), "n2".to_string(), "n3".to_string()],
        )
    }

    fn exchange(
        platform: &Arc<Platform>,
        itinerary: &[&str],
        threshold: i64,
        samples: &[u8],
    ) -> (ExchangeProcess, Mailbox, ProcessId) {
        let id = ProcessId::new("exchange-0");
        let mailbox = platform.attach_route(id.name(), "n1").unwrap();
        let proc = ExchangeProcess::new(
            id.clone(),
            itinerary.iter().map(|n| n.to_string()).collect(),
            threshold,
            Box::new(ScriptedProbe::new(samples)),
        )
        .unwrap();
        (proc, mailbox, id)
    }

    struct NoProbe;

    impl LoadProbe for NoProbe {
        fn available(&self) -> bool {
            false
        }

        fn sample(&mut self) -> crate::Result<u8> {
            Ok(0)
        }
    }

    fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        cond()
    }

    #[test]
    fn test_new_rejects_foreign_names_and_empty_itineraries() {
        let probe = || Box::new(ScriptedProbe::new(&[]));
        assert!(ExchangeProcess::new(
            ProcessId::new("worker-0"),
            vec!["n1".to_string()],
            30,
            probe(),
        )
        .is_err());
        assert!(
            ExchangeProcess::new(ProcessId::new("exchange-0"), Vec::new(), 30, probe()).is_err()
        );
    }

    #[test]
    fn test_threshold_lives_in_the_parameter_set() {
        let platform = platform();
        let (proc, _mailbox, _id) = exchange(&platform, &["n1", "n2"], 30, &[]);
        assert_eq!(proc.params.get(PARAM_LOAD_THRESHOLD), Some(&30));
        assert_eq!(proc.pair.name(), "compute-0");
    }

    #[test]
    fn test_load_below_threshold_stays_put() {
        let platform = platform();
        let (mut proc, mut mailbox, id) = exchange(&platform, &["n1", "n2"], 30, &[10]);

        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        proc.poll_task(TASK_MONITOR, &mut ctx).unwrap();
        assert_eq!(ctx.take_control(), Control::None);
        assert_eq!(proc.index, 0);
    }

    #[test]
    fn test_load_over_threshold_advances_and_relocates() {
        let platform = platform();
        let (mut proc, mut mailbox, id) = exchange(&platform, &["n1", "n2"], 30, &[45]);

        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        proc.poll_task(TASK_MONITOR, &mut ctx).unwrap();
        assert_eq!(ctx.take_control(), Control::Relocate("n2".to_string()));
        assert_eq!(proc.index, 1);
    }

    #[test]
    fn test_load_equal_to_threshold_stays_put() {
        let platform = platform();
        let (mut proc, mut mailbox, id) = exchange(&platform, &["n1", "n2"], 30, &[30]);

        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        proc.poll_task(TASK_MONITOR, &mut ctx).unwrap();
        assert_eq!(ctx.take_control(), Control::None);
    }

    #[test]
    fn test_itinerary_wraps_around() {
        let platform = platform();
        let (mut proc, mut mailbox, id) =
            exchange(&platform, &["n1", "n2", "n3"], 30, &[99, 99, 99]);

        let mut targets = Vec::new();
        for _ in 0..3 {
            let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
            proc.poll_task(TASK_MONITOR, &mut ctx).unwrap();
            match ctx.take_control() {
                Control::Relocate(node) => targets.push(node),
                other => panic!("expected a relocation, got {:?}", other),
            }
        }
        assert_eq!(targets, vec!["n2", "n3", "n1"]);
        assert_eq!(proc.index, 0);
    }

    #[test]
    fn test_unavailable_probe_disables_monitoring() {
        let platform = platform();
        let id = ProcessId::new("exchange-0");
        let mut mailbox = platform.attach_route(id.name(), "n1").unwrap();
        let mut proc = ExchangeProcess::new(
            id.clone(),
            vec!["n1".to_string()],
            30,
            Box::new(NoProbe),
        )
        .unwrap();

        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        assert_eq!(proc.poll_task(TASK_MONITOR, &mut ctx).unwrap(), Flow::Done);
    }

    #[test]
    fn test_first_departure_skips_deregistering() {
        let platform = platform();
        let (mut proc, mut mailbox, id) = exchange(&platform, &["n1", "n2"], 30, &[]);
        platform.directory().register(SERVICE_TYPE, &id).unwrap();

        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        proc.before_relocate(&mut ctx);
        assert!(platform.directory().is_registered("exchange-0"));

        proc.first_move = false;
        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        proc.before_relocate(&mut ctx);
        assert!(!platform.directory().is_registered("exchange-0"));
    }

    #[test]
    fn test_arrival_registers_and_orders_the_pair_to_follow() {
        let platform = platform();
        let (mut proc, mut mailbox, id) = exchange(&platform, &["n1", "n2"], 30, &[]);
        let mut pair = platform.attach(ProcessId::new("compute-0"), "n1").unwrap();
        proc.index = 1;

        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n2");
        proc.after_relocate(&mut ctx, "n1", "n2");

        assert!(!proc.first_move);
        let registered = platform.directory().query(SERVICE_TYPE);
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].name(), "exchange-0");

        let order = pair
            .poll(&MsgFilter::opcode(Opcode::RelocateOrder).with_intent(Intent::Inform))
            .expect("pair never ordered");
        assert!(order.encoding_matches());
        assert_eq!(order.payload.as_deref(), Some("n2"));
    }

    #[test]
    fn test_arrival_resyncs_index_when_landing_differs_from_plan() {
        let platform = platform();
        let (mut proc, mut mailbox, id) = exchange(&platform, &["n1", "n2", "n3"], 30, &[]);
        proc.index = 1; // plan says n2

        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n3");
        proc.after_relocate(&mut ctx, "n1", "n3");
        assert_eq!(proc.index, 2);
    }

    #[test]
    fn test_completion_is_accepted_from_the_pair_only() {
        let platform = platform();
        let (mut proc, mut mailbox, id) = exchange(&platform, &["n1", "n2"], 30, &[]);
        let stranger = platform.attach(ProcessId::new("compute-9"), "n1").unwrap();
        let pair = platform.attach(ProcessId::new("compute-0"), "n1").unwrap();

        stranger.send(
            Envelope::new(Opcode::Completion, Intent::Inform, stranger.id().clone())
                .to(id.clone()),
        );
        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        let flow = proc.poll_task(TASK_COMPLETION, &mut ctx).unwrap();
        assert!(matches!(flow, Flow::Idle(_)));
        assert_eq!(ctx.take_control(), Control::None);

        pair.send(
            Envelope::new(Opcode::Completion, Intent::Inform, pair.id().clone()).to(id.clone()),
        );
        let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, "n1");
        let flow = proc.poll_task(TASK_COMPLETION, &mut ctx).unwrap();
        assert_eq!(flow, Flow::Done);
        assert_eq!(ctx.take_control(), Control::Stop);

        // The stranger's signal was left unconsumed.
        assert_eq!(mailbox.backlog_len(), 1);
    }

    #[test]
    fn test_spike_migrates_exchange_and_pair_end_to_end() {
        let platform = Platform::new("test", vec!["n1".to_string(), "n2".to_string()]);

        let coordinator_id = ProcessId::new("coordinator");
        let _coordinator = platform.attach(coordinator_id.clone(), "n1").unwrap();

        let compute = ComputeProcess::new(
            ProcessId::new("compute-0"),
            coordinator_id,
            Box::new(DemoSolver::new(Duration::from_secs(3600))),
        )
        .unwrap()
        .with_periods(Duration::from_millis(20), Duration::from_secs(5));

        let exchange = ExchangeProcess::new(
            ProcessId::new("exchange-0"),
            vec!["n1".to_string(), "n2".to_string()],
            30,
            Box::new(ScriptedProbe::new(&[10, 45])),
        )
        .unwrap()
        .with_sample_period(Duration::from_millis(20));

        let compute_handle = platform.spawn(Box::new(compute), "n1").unwrap();
        let exchange_handle = platform.spawn(Box::new(exchange), "n1").unwrap();

        // Sample 1 (10) keeps the pair on n1; sample 2 (45) moves it to n2.
        let migrated = wait_until(Duration::from_secs(5), || {
            platform.location_of("exchange-0").as_deref() == Some("n2")
                && platform.location_of("compute-0").as_deref() == Some("n2")
        });
        assert!(migrated, "pair never co-located on n2");
        assert_eq!(platform.relocation_count(), 2);
        assert!(platform.directory().is_registered("exchange-0"));

        exchange_handle.request_stop();
        compute_handle.request_stop();
        exchange_handle.join().unwrap();
        compute_handle.join().unwrap();
    }
}
