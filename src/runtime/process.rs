//! Cooperative process scheduler
//!
//! Every process runs on a dedicated thread, but its tasks share the thread
//! cooperatively: one task body executes at a time, and a task must yield
//! (optionally asking to be woken no sooner than some delay) before a
//! sibling runs. A task that finds no matching message yields for a fixed
//! backoff instead of spinning.
//!
//! The runner parks on the process mailbox between passes, so an arriving
//! envelope wakes the process before its earliest deadline. Relocation and
//! termination are requested by tasks through [`ProcessCtx`] and executed by
//! the runner between task polls; the task queue is suspended while a
//! relocation's hooks run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::proto::{Envelope, MsgFilter};
use crate::runtime::discovery::Directory;
use crate::runtime::id::ProcessId;
use crate::runtime::mailbox::Mailbox;
use crate::runtime::Platform;

/// Yield period for a task that found no matching message
pub const POLL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest the runner parks before re-checking its stop flag
const STOP_POLL: Duration = Duration::from_millis(500);

/// What a task asks of the scheduler after one body execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run again on the next pass
    Ready,
    /// Wake no sooner than this delay from now
    Idle(Duration),
    /// Remove this task from the queue
    Done,
}

/// A process on the platform: identity, task queue, and lifecycle hooks
///
/// `poll_task` dispatches on the task's position in `task_labels`. The
/// relocation hooks run with the task queue suspended: `before_relocate` on
/// the origin node, `after_relocate` on the destination. `on_stop` runs once
/// when the process winds down, voluntarily or by platform request.
pub trait Process: Send + 'static {
    fn id(&self) -> &ProcessId;

    /// Labels of this process's tasks, in queue order
    fn task_labels(&self) -> &'static [&'static str];

    /// Execute one body of the task at `task`
    fn poll_task(&mut self, task: usize, ctx: &mut ProcessCtx<'_>) -> crate::Result<Flow>;

    fn before_relocate(&mut self, _ctx: &mut ProcessCtx<'_>) {}

    fn after_relocate(&mut self, _ctx: &mut ProcessCtx<'_>, _origin: &str, _landed: &str) {}

    fn on_stop(&mut self, _ctx: &mut ProcessCtx<'_>) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Control {
    None,
    Relocate(String),
    Stop,
}

/// Capabilities handed to a task for one body execution
pub struct ProcessCtx<'a> {
    platform: &'a Platform,
    mailbox: &'a mut Mailbox,
    id: &'a ProcessId,
    node: &'a str,
    control: Control,
}

impl<'a> ProcessCtx<'a> {
    pub(crate) fn new(
        platform: &'a Platform,
        mailbox: &'a mut Mailbox,
        id: &'a ProcessId,
        node: &'a str,
    ) -> Self {
        Self {
            platform,
            mailbox,
            id,
            node,
            control: Control::None,
        }
    }

    pub fn id(&self) -> &ProcessId {
        self.id
    }

    /// Node this process currently occupies
    pub fn node(&self) -> &str {
        self.node
    }

    pub fn directory(&self) -> &Directory {
        self.platform.directory()
    }

    /// Send an envelope to every receiver it names; never blocks
    pub fn send(&self, env: Envelope) {
        debug!(msg = %env, "send");
        self.platform.route(env);
    }

    /// Non-blocking filtered poll of the private inbox
    pub fn poll_msg(&mut self, filter: &MsgFilter) -> Option<Envelope> {
        self.mailbox.poll(filter)
    }

    /// Ask the runner to relocate this process after the current task yields
    pub fn request_relocate(&mut self, node: impl Into<String>) {
        self.control = Control::Relocate(node.into());
    }

    /// Ask the runner to terminate this process after the current task yields
    pub fn request_stop(&mut self) {
        self.control = Control::Stop;
    }

    pub(crate) fn take_control(&mut self) -> Control {
        std::mem::replace(&mut self.control, Control::None)
    }
}

/// Drive a process until it stops, all tasks finish, or a task fails
///
/// A task error is a non-recoverable local fault: this process terminates
/// (after its `on_stop` hook) and the error is reported through the join
/// handle; the platform and every other process keep running.
pub(crate) fn run_process(
    platform: Arc<Platform>,
    mut process: Box<dyn Process>,
    mut mailbox: Mailbox,
    stop: Arc<AtomicBool>,
) -> crate::Result<()> {
    let id = process.id().clone();
    let _span = tracing::info_span!("process", id = %id.name()).entered();

    let labels = process.task_labels();
    let mut wake: Vec<Option<Instant>> = vec![Some(Instant::now()); labels.len()];
    let mut node = platform.location_of(id.name()).unwrap_or_default();

    info!(node = %node, "process started");

    let outcome = 'run: loop {
        if stop.load(Ordering::Relaxed) {
            info!("stop requested by platform");
            break Ok(());
        }
        if wake.iter().all(Option::is_none) {
            debug!("all tasks finished");
            break Ok(());
        }

        let pass_started = Instant::now();
        for task in 0..wake.len() {
            let due = matches!(wake[task], Some(at) if at <= pass_started);
            if !due {
                continue;
            }

            let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, &node);
            let flow = match process.poll_task(task, &mut ctx) {
                Ok(flow) => flow,
                Err(err) => {
                    error!(task = labels[task], error = %err, "task failed, terminating process");
                    break 'run Err(err);
                }
            };
            let control = ctx.take_control();

            wake[task] = match flow {
                Flow::Ready => Some(Instant::now()),
                Flow::Idle(delay) => Some(Instant::now() + delay),
                Flow::Done => None,
            };

            match control {
                Control::None => {}
                Control::Stop => break 'run Ok(()),
                Control::Relocate(target) => {
                    relocate(&platform, process.as_mut(), &mut mailbox, &id, &mut node, &target);
                }
            }
        }

        // Park until the earliest deadline or an arriving envelope, capped
        // so the stop flag is observed promptly.
        let now = Instant::now();
        if let Some(earliest) = wake.iter().flatten().min().copied() {
            if earliest > now {
                mailbox.wait((earliest - now).min(STOP_POLL));
            }
        }
    };

    let mut ctx = ProcessCtx::new(&platform, &mut mailbox, &id, &node);
    process.on_stop(&mut ctx);
    platform.detach(id.name());
    info!(node = %node, "process terminated");
    outcome
}

/// Execute a relocation inline, with the task queue suspended
fn relocate(
    platform: &Platform,
    process: &mut dyn Process,
    mailbox: &mut Mailbox,
    id: &ProcessId,
    node: &mut String,
    target: &str,
) {
    if target == node.as_str() {
        debug!(node = %target, "already on relocation target, staying");
        return;
    }
    if !platform.node_exists(target) {
        warn!(node = %target, "relocation refused, unknown node");
        return;
    }

    let origin = node.clone();
    info!(from = %origin, to = %target, "relocating");

    {
        let mut ctx = ProcessCtx::new(platform, mailbox, id, node);
        process.before_relocate(&mut ctx);
    }

    platform.record_move(id.name(), target);
    *node = target.to_string();

    let mut ctx = ProcessCtx::new(platform, mailbox, id, node);
    process.after_relocate(&mut ctx, &origin, target);
}

/// Handle to a spawned process
///
/// Dropping the handle does not stop the process; `request_stop` asks it to
/// wind down and `join` collects its outcome.
pub struct ProcessHandle {
    pub(crate) name: String,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) join: std::thread::JoinHandle<crate::Result<()>>,
}

impl ProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the process to wind down after its current task yields
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Whether the process thread has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the process to terminate and collect its outcome
    pub fn join(self) -> crate::Result<()> {
        match self.join.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("process {} panicked", self.name)),
        }
    }
}
