//! Process platform
//!
//! This module implements the fabric the three process roles run on: named
//! execution nodes, per-process mailboxes with routed delivery, a discovery
//! directory, and relocation of processes between nodes.
//!
//! # Architecture
//!
//! - **Platform**: owns the node list, the name→mailbox router, process
//!   locations, and the discovery directory
//! - **Processes**: one thread each, scheduled cooperatively (see `process`)
//! - **Delivery**: at-most-once; a missing route or dropped mailbox loses
//!   the envelope and is reported at debug level only
//!
//! # Modules
//!
//! - `id`: process identifiers and the pair naming convention
//! - `mailbox`: private inboxes with filtered polling
//! - `process`: task scheduling, relocation, lifecycle
//! - `discovery`: the register/query/deregister directory

pub mod discovery;
pub mod id;
pub mod mailbox;
pub mod process;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::debug;

use crate::proto::{Envelope, MsgFilter};

pub use discovery::{Directory, DiscoveryError};
pub use id::ProcessId;
pub use mailbox::{Mailbox, MailboxSender};
pub use process::{Flow, Process, ProcessCtx, ProcessHandle, POLL_BACKOFF};

/// The execution fabric shared by every process in one swarm
pub struct Platform {
    name: String,
    nodes: Vec<String>,
    router: Mutex<HashMap<String, MailboxSender>>,
    locations: Mutex<HashMap<String, String>>,
    directory: Directory,
    relocations: AtomicU64,
}

impl Platform {
    /// Create a platform with a fixed set of execution nodes
    pub fn new(name: impl Into<String>, nodes: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            nodes,
            router: Mutex::new(HashMap::new()),
            locations: Mutex::new(HashMap::new()),
            directory: Directory::new(),
            relocations: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node_exists(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Last known node of a process; survives the process's termination
    pub fn location_of(&self, process: &str) -> Option<String> {
        self.locations.lock().unwrap().get(process).cloned()
    }

    /// Completed relocations since the platform started
    pub fn relocation_count(&self) -> u64 {
        self.relocations.load(Ordering::Relaxed)
    }

    /// Deliver an envelope to every receiver it names
    ///
    /// Missing routes and dropped mailboxes lose the message; delivery is
    /// at-most-once and never blocks the sender.
    pub fn route(&self, env: Envelope) {
        let router = self.router.lock().unwrap();
        for receiver in &env.receivers {
            match router.get(receiver.name()) {
                Some(tx) => {
                    if !tx.deliver(env.clone()) {
                        debug!(to = %receiver.name(), msg = %env, "receiver gone, message dropped");
                    }
                }
                None => {
                    debug!(to = %receiver.name(), msg = %env, "no route, message dropped");
                }
            }
        }
    }

    /// Spawn a process on `node`, giving it a thread and a mailbox
    pub fn spawn(
        self: &Arc<Self>,
        process: Box<dyn Process>,
        node: &str,
    ) -> crate::Result<ProcessHandle> {
        let id = process.id().clone();
        if !self.node_exists(node) {
            anyhow::bail!("cannot spawn {} on unknown node {}", id.name(), node);
        }
        let mailbox = self.attach_route(id.name(), node)?;

        let stop = Arc::new(AtomicBool::new(false));
        let platform = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);
        let name = id.name().to_string();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || process::run_process(platform, process, mailbox, stop_flag))
            .with_context(|| format!("failed to spawn thread for {}", name))?;

        Ok(ProcessHandle { name, stop, join })
    }

    /// Attach a bare endpoint on `node`, without a process thread
    ///
    /// The endpoint sends and receives under the given id like any process;
    /// callers drive it by hand. Used to stand in for a peer.
    pub fn attach(self: &Arc<Self>, id: ProcessId, node: &str) -> crate::Result<Endpoint> {
        if !self.node_exists(node) {
            anyhow::bail!("cannot attach {} on unknown node {}", id.name(), node);
        }
        let mailbox = self.attach_route(id.name(), node)?;
        Ok(Endpoint {
            id,
            mailbox,
            platform: Arc::clone(self),
        })
    }

    pub(crate) fn attach_route(&self, name: &str, node: &str) -> crate::Result<Mailbox> {
        let (tx, mailbox) = mailbox::mailbox();
        {
            let mut router = self.router.lock().unwrap();
            if router.contains_key(name) {
                anyhow::bail!("process name {} is already attached", name);
            }
            router.insert(name.to_string(), tx);
        }
        self.locations
            .lock()
            .unwrap()
            .insert(name.to_string(), node.to_string());
        Ok(mailbox)
    }

    /// Record a completed move of `process` to `node`
    pub(crate) fn record_move(&self, process: &str, node: &str) {
        self.locations
            .lock()
            .unwrap()
            .insert(process.to_string(), node.to_string());
        self.relocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a process's route; its last known location is kept
    pub(crate) fn detach(&self, name: &str) {
        self.router.lock().unwrap().remove(name);
    }
}

/// A mailbox attached to the platform without a process thread
pub struct Endpoint {
    id: ProcessId,
    mailbox: Mailbox,
    platform: Arc<Platform>,
}

impl Endpoint {
    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    pub fn send(&self, env: Envelope) {
        self.platform.route(env);
    }

    pub fn poll(&mut self, filter: &MsgFilter) -> Option<Envelope> {
        self.mailbox.poll(filter)
    }

    /// Poll, parking up to `timeout` until a matching envelope arrives
    pub fn poll_within(&mut self, filter: &MsgFilter, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(env) = self.mailbox.poll(filter) {
                return Some(env);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.mailbox.wait(deadline - now);
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.platform.detach(self.id.name());
    }
}
