//! Transversal coordinator
//!
//! The per-platform authority over shutdown. It tracks the single compute
//! process currently believed to hold the best result (assigned out of band,
//! read-only here), pulls that result exactly once, and runs the termination
//! barrier: every worker that signals completion is confirmed-released
//! immediately, except the privileged one, which is held back until its
//! result has been captured. The coordinator never compares results; it only
//! honors the assignment.
//!
//! ```text
//! compute-1 -- COMPLETION/INFORM -->|             released at once
//! compute-0 -- COMPLETION/INFORM -->| privileged: RETRIEVE_RESULT first,
//!                                   | CONFIRM after the result landed
//! ```

pub mod peers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::proto::{codec, Envelope, Intent, MsgFilter, Opcode, RESULT_QUERY};
use crate::runtime::{Flow, Process, ProcessCtx, ProcessId, POLL_BACKOFF};

/// Delay before re-querying after a REFUSE or a decode failure
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

const TASK_RETRIEVE: usize = 0;
const TASK_BARRIER: usize = 1;

const TASK_LABELS: &[&str] = &["retrieve-result", "completion-barrier"];

/// Shared cell naming the privileged compute process
///
/// Written by whoever ranks results, read by the coordinator.
pub type BestCell = Arc<Mutex<Option<ProcessId>>>;

/// Observable barrier state, published for reporting
#[derive(Debug, Clone, Default)]
pub struct BarrierSnapshot {
    /// Workers confirmed-released so far, in release order
    pub released: Vec<String>,
    /// Captured result bytes, present once the privileged worker was drained
    pub result: Option<Vec<u8>>,
    /// Name of the privileged worker at the last publish
    pub best: Option<String>,
}

/// Step of the lazy result retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetrievalStep {
    /// Send RETRIEVE_RESULT/QUERY to the privileged process
    Send,
    /// Await INFORM with the encoded result, or REFUSE
    Recv,
}

#[derive(Debug, Default, Clone, Copy)]
struct CoordinatorFlags {
    /// A retrieval is wanted and not yet satisfied
    requesting_result: bool,
    /// The result cache is filled
    result_present: bool,
    /// The privileged process signaled completion before its result landed
    pending_retrieval_for_shutdown: bool,
}

/// The coordinator role: result custodian and termination barrier
pub struct TransversalCoordinator {
    id: ProcessId,
    best: BestCell,
    flags: CoordinatorFlags,
    retrieval: RetrievalStep,
    result: Option<Vec<u8>>,
    released: Vec<String>,
    snapshot: Arc<Mutex<BarrierSnapshot>>,
    retry_delay: Duration,
}

impl TransversalCoordinator {
    pub fn new(id: ProcessId, best: BestCell) -> Self {
        Self {
            id,
            best,
            flags: CoordinatorFlags::default(),
            retrieval: RetrievalStep::Send,
            result: None,
            released: Vec::new(),
            snapshot: Arc::new(Mutex::new(BarrierSnapshot::default())),
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the refusal retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Handle onto the published barrier state; clone before spawning
    pub fn snapshot_handle(&self) -> Arc<Mutex<BarrierSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    fn best_id(&self) -> Option<ProcessId> {
        self.best.lock().unwrap().clone()
    }

    /// Lazy retrieval state machine, active only while a result is wanted
    fn poll_retrieve(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        if !self.flags.requesting_result {
            return Ok(Flow::Idle(POLL_BACKOFF));
        }
        match self.retrieval {
            RetrievalStep::Send => {
                let Some(best) = self.best_id() else {
                    debug!("result wanted but no privileged process assigned yet");
                    return Ok(Flow::Idle(POLL_BACKOFF));
                };
                info!(best = %best.name(), "querying the privileged process for its result");
                ctx.send(
                    Envelope::new(Opcode::RetrieveResult, Intent::Query, self.id.clone())
                        .to(best)
                        .with_encoding()
                        .with_payload(RESULT_QUERY),
                );
                self.retrieval = RetrievalStep::Recv;
                Ok(Flow::Idle(POLL_BACKOFF))
            }
            RetrievalStep::Recv => self.poll_result_reply(ctx),
        }
    }

    fn poll_result_reply(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        let Some(best) = self.best_id() else {
            self.retrieval = RetrievalStep::Send;
            return Ok(Flow::Idle(POLL_BACKOFF));
        };
        let filter = MsgFilter::opcode(Opcode::RetrieveResult).from_sender(best.name());
        let Some(reply) = ctx.poll_msg(&filter) else {
            return Ok(Flow::Idle(POLL_BACKOFF));
        };

        match reply.intent {
            Intent::Refuse => {
                warn!(
                    reason = reply.payload.as_deref().unwrap_or("unspecified"),
                    "result refused, will retry"
                );
                self.retrieval = RetrievalStep::Send;
                Ok(Flow::Idle(self.retry_delay))
            }
            Intent::Inform if reply.encoding_matches() => {
                match reply.payload.as_deref().map(codec::decode_result) {
                    Some(Ok(bytes)) => {
                        info!(bytes = bytes.len(), from = %best.name(), "result captured");
                        self.result = Some(bytes);
                        self.flags.requesting_result = false;
                        self.flags.result_present = true;
                        self.retrieval = RetrievalStep::Send;
                        self.publish_snapshot();
                        Ok(Flow::Ready)
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "result decode failed, will retry");
                        self.retrieval = RetrievalStep::Send;
                        Ok(Flow::Idle(self.retry_delay))
                    }
                    None => {
                        warn!("result reply carried no payload, will retry");
                        self.retrieval = RetrievalStep::Send;
                        Ok(Flow::Idle(self.retry_delay))
                    }
                }
            }
            _ => {
                debug!(msg = %reply, "dropping result reply with foreign encoding or intent");
                Ok(Flow::Idle(POLL_BACKOFF))
            }
        }
    }

    /// Termination barrier, always on
    fn poll_barrier(&mut self, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        let filter = MsgFilter::opcode(Opcode::Completion).with_intent(Intent::Inform);
        let mut flow = Flow::Idle(POLL_BACKOFF);
        if let Some(signal) = ctx.poll_msg(&filter) {
            self.on_completion_signal(ctx, signal);
            flow = Flow::Ready;
        }

        // The privileged process is held back until its result landed.
        if self.flags.pending_retrieval_for_shutdown && self.flags.result_present {
            self.flags.pending_retrieval_for_shutdown = false;
            if let Some(best) = self.best_id() {
                info!(best = %best.name(), "result captured, releasing the privileged process");
                self.release(ctx, &best);
            }
        }
        Ok(flow)
    }

    fn on_completion_signal(&mut self, ctx: &mut ProcessCtx<'_>, signal: Envelope) {
        let sender = signal.sender;
        if self.released.iter().any(|n| n == sender.name()) {
            debug!(process = %sender.name(), "duplicate completion signal, confirming again");
            self.release(ctx, &sender);
            return;
        }

        let is_best = self.best_id().is_some_and(|b| b.name() == sender.name());
        if is_best && !self.flags.result_present {
            if self.flags.pending_retrieval_for_shutdown {
                debug!(process = %sender.name(), "retrieval already pending, signal ignored");
            } else {
                info!(
                    process = %sender.name(),
                    "privileged process finished, fetching its result before release"
                );
                self.flags.pending_retrieval_for_shutdown = true;
                self.flags.requesting_result = true;
            }
            return;
        }

        if is_best {
            info!(process = %sender.name(), "privileged process finished, result already captured");
        } else {
            info!(process = %sender.name(), "releasing non-privileged process");
        }
        self.release(ctx, &sender);
    }

    /// Confirm a worker's termination; duplicates re-confirm without counting
    fn release(&mut self, ctx: &mut ProcessCtx<'_>, target: &ProcessId) {
        ctx.send(
            Envelope::new(Opcode::Completion, Intent::Confirm, self.id.clone())
                .to(target.clone()),
        );
        if !self.released.iter().any(|n| n == target.name()) {
            self.released.push(target.name().to_string());
            info!(
                process = %target.name(),
                released = self.released.len(),
                "release confirmed"
            );
            self.publish_snapshot();
        }
    }

    fn publish_snapshot(&self) {
        let mut snap = self.snapshot.lock().unwrap();
        snap.released = self.released.clone();
        snap.result = self.result.clone();
        snap.best = self.best_id().map(|b| b.name().to_string());
    }
}

impl Process for TransversalCoordinator {
    fn id(&self) -> &ProcessId {
        &self.id
    }

    fn task_labels(&self) -> &'static [&'static str] {
        TASK_LABELS
    }

    fn poll_task(&mut self, task: usize, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow> {
        match task {
            TASK_RETRIEVE => self.poll_retrieve(ctx),
            TASK_BARRIER => self.poll_barrier(ctx),
            _ => Ok(Flow::Done),
        }
    }

    fn on_stop(&mut self, _ctx: &mut ProcessCtx<'_>) {
        self.publish_snapshot();
        info!(released = self.released.len(), "coordinator retiring");
    }
}
