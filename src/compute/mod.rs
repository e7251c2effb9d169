//! Compute process
//!
//! The relocatable unit that runs the optimization workload. It serves its
//! current result on demand, follows relocation orders from its paired
//! exchange process, and, once its solver reports finished, runs the
//! completion handshake with the transversal coordinator:
//!
//! ```text
//! Compute                          Coordinator
//!    |-------- COMPLETION/INFORM ----->|      solver finished
//!    |<------- COMPLETION/CONFIRM -----|      released
//!    |-- COMPLETION/INFORM --> paired exchange, then terminate
//! ```
//!
//! The result bytes stay opaque here: the process serializes nothing itself
//! and only wraps what the solver hands it.

pub mod solver;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::proto::{codec, Envelope, Intent, MsgFilter, Opcode, RESULT_QUERY, WIRE_ENCODING};
use crate::runtime::id::{self, COMPUTE_PREFIX};
use crate::runtime::{Flow, Process, ProcessCtx, ProcessId, POLL_BACKOFF};

use solver::Solver;

/// Poll period of the relocate-order listener
pub const RELOCATE_POLL_PERIOD: Duration = Duration::from_secs(2);

/// Retransmit period for an unacknowledged completion signal
pub const SIGNAL_RETRY_PERIOD: Duration = Duration::from_secs(5);

const TASK_PRESENT: usize = 0;
const TASK_RELOCATE: usize = 1;
const TASK_COMPLETION: usize = 2;

const TASK_LABELS: &[&str] = &["present-result", "relocate-listener", "completion-handshake"];

/// Step of the completion handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeStep {
    /// Send COMPLETION/INFORM to the coordinator
    Signal,
    /// Await COMPLETION/CONFIRM, then forward to the pair and terminate
    AwaitAck,
}

/// Transient control flags
#[derive(Debug, Default, Clone, Copy)]
struct ComputeFlags {
    /// Set while a result reply is being assembled
    presenting: bool,
    /// Set between the departure and arrival hooks of a relocation
    moving: bool,
}

/// The compute role: workload holder, result server, handshake initiator
pub struct ComputeProcess {
    id: ProcessId,
    pair: ProcessId,
    coordinator: ProcessId,
    solver: Box<dyn Solver>,
    flags: ComputeFlags,
    handshake: HandshakeStep,
    last_signal: Option<Instant>,
    relocate_poll: Duration,
    signal_retry: Duration,
}

impl ComputeProcess {
    /// Create a compute process; the paired exchange id is derived from the
    /// own name, the coordinator id is handed in at startup
    pub fn new(
        id: ProcessId,
        coordinator: ProcessId,
        solver: Box<dyn Solver>,
    ) -> crate::Result<Self> {
        if !id.name().starts_with(COMPUTE_PREFIX) {
            anyhow::bail!("{} is not a compute process name", id.name());
        }
        let pair = id::pair_name(id.name())
            .map(ProcessId::new)
            .ok_or_else(|| anyhow::anyhow!("cannot derive pair of {}", id.name()))?;
        Ok(Self {
            id,
            pair,
            coordinator,
            solver,
            flags: ComputeFlags::default(),
            handshake: HandshakeStep::Signal,
            last_signal: None,
            relocate_poll: RELOCATE_POLL_PERIOD,
            signal_retry: SIGNAL_RETRY_PERIOD,
        })
    }

    /// Override the fixed task periods
    pub fn with_periods(mut self, relocate_poll: Duration, signal_retry: Duration) -> Self {
        self.relocate_poll = relocate_poll;
        self.signal_retry = signal_retry;
        self
    }

    /// Serve the current result to whoever asks for it
    ///
    /// QUERY with the exact request body and a matching encoding tag gets
    /// INFORM with the encoded result; a well-formed request that cannot be
    /// honored gets REFUSE with a reason; anything else gets REJECT.
    fn poll_present(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        let Some(request) = ctx.poll_msg(&MsgFilter::opcode(Opcode::RetrieveResult)) else {
            return Ok(Flow::Idle(POLL_BACKOFF));
        };

        match request.intent {
            Intent::Query if request.encoding_matches() => match request.payload.as_deref() {
                Some(RESULT_QUERY) => {
                    self.flags.presenting = true;
                    let reply = match self.solver.best_result() {
                        Ok(bytes) => {
                            info!(
                                to = %request.sender.name(),
                                bytes = bytes.len(),
                                "presenting current result"
                            );
                            request
                                .reply(self.id.clone(), Intent::Inform)
                                .with_encoding()
                                .with_payload(codec::encode_result(&bytes))
                        }
                        Err(err) => {
                            warn!(error = %err, "solver could not produce a result");
                            request
                                .reply(self.id.clone(), Intent::Refuse)
                                .with_payload(format!("result unavailable: {}", err))
                        }
                    };
                    ctx.send(reply);
                    self.flags.presenting = false;
                }
                Some(body) => {
                    info!(body, "refusing unknown request body");
                    ctx.send(
                        request
                            .reply(self.id.clone(), Intent::Refuse)
                            .with_payload(format!("unknown request body: {}", body)),
                    );
                }
                None => {
                    ctx.send(
                        request
                            .reply(self.id.clone(), Intent::Refuse)
                            .with_payload("missing request body"),
                    );
                }
            },
            Intent::Query => {
                info!(from = %request.sender.name(), "refusing query with foreign encoding");
                ctx.send(
                    request
                        .reply(self.id.clone(), Intent::Refuse)
                        .with_payload(format!("accepts {} queries only", WIRE_ENCODING)),
                );
            }
            _ => {
                ctx.send(
                    request
                        .reply(self.id.clone(), Intent::Reject)
                        .with_payload("not understood"),
                );
            }
        }
        Ok(Flow::Ready)
    }

    /// Follow relocation orders from the paired exchange
    ///
    /// A matched order with no target node is a non-recoverable local fault:
    /// the task errors and the process terminates.
    fn poll_relocate_order(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        let filter = MsgFilter::opcode(Opcode::RelocateOrder).with_intent(Intent::Inform);
        let Some(order) = ctx.poll_msg(&filter) else {
            return Ok(Flow::Idle(self.relocate_poll));
        };

        if !order.encoding_matches() {
            debug!(msg = %order, "ignoring relocate order with foreign encoding");
            return Ok(Flow::Idle(self.relocate_poll));
        }
        let target = order.payload.ok_or_else(|| {
            anyhow::anyhow!(
                "relocate order from {} names no target node",
                order.sender.name()
            )
        })?;

        info!(to = %target, from = %order.sender.name(), "ordered to relocate");
        ctx.request_relocate(target);
        Ok(Flow::Idle(self.relocate_poll))
    }

    /// Two-step completion handshake, active once the solver is finished
    fn poll_completion(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        match self.handshake {
            HandshakeStep::Signal => {
                if !self.solver.finished() {
                    return Ok(Flow::Idle(POLL_BACKOFF));
                }
                info!(to = %self.coordinator.name(), "signaling completion");
                self.send_completion_signal(ctx);
                self.handshake = HandshakeStep::AwaitAck;
                Ok(Flow::Idle(POLL_BACKOFF))
            }
            HandshakeStep::AwaitAck => {
                let filter = MsgFilter::opcode(Opcode::Completion).with_intent(Intent::Confirm);
                match ctx.poll_msg(&filter) {
                    Some(confirm) => {
                        info!(
                            by = %confirm.sender.name(),
                            pair = %self.pair.name(),
                            "release confirmed, forwarding to pair and terminating"
                        );
                        ctx.send(
                            Envelope::new(Opcode::Completion, Intent::Inform, self.id.clone())
                                .to(self.pair.clone()),
                        );
                        ctx.request_stop();
                        Ok(Flow::Done)
                    }
                    None => {
                        let retransmit = self
                            .last_signal
                            .map_or(true, |at| at.elapsed() >= self.signal_retry);
                        if retransmit {
                            debug!("completion signal unacknowledged, re-sending");
                            self.send_completion_signal(ctx);
                        }
                        Ok(Flow::Idle(POLL_BACKOFF))
                    }
                }
            }
        }
    }

    fn send_completion_signal(&mut self, ctx: &mut ProcessCtx<'_>) {
        ctx.send(
            Envelope::new(Opcode::Completion, Intent::Inform, self.id.clone())
                .to(self.coordinator.clone()),
        );
        self.last_signal = Some(Instant::now());
    }
}

impl Process for ComputeProcess {
    fn id(&self) -> &ProcessId {
        &self.id
    }

    fn task_labels(&self) -> &'static [&'static str] {
        TASK_LABELS
    }

    fn poll_task(&mut self, task: usize, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        match task {
            TASK_PRESENT => self.poll_present(ctx),
            TASK_RELOCATE => self.poll_relocate_order(ctx),
            TASK_COMPLETION => self.poll_completion(ctx),
            _ => Ok(Flow::Done),
        }
    }

    fn before_relocate(&mut self, _ctx: &mut ProcessCtx<'_>) {
        self.flags.moving = true;
        debug!("departing");
    }

    fn after_relocate(&mut self, _ctx: &mut ProcessCtx<'_>, origin: &str, landed: &str) {
        self.flags.moving = false;
        info!(from = %origin, node = %landed, "arrived");
    }

    fn on_stop(&mut self, _ctx: &mut ProcessCtx<'_>) {
        info!("compute process retiring");
    }
}
