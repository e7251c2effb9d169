//! Per-process inbox
//!
//! Each process owns exactly one mailbox. Senders deposit envelopes through
//! a cloned handle and never block; the owning process polls with a selection
//! filter. Envelopes that match no filter stay queued until a task asks for
//! them, so interleaved conversations do not steal each other's messages.
//!
//! Delivery is at-most-once: an envelope is handed out exactly once or not
//! at all, and nothing retransmits at this layer.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::proto::{Envelope, MsgFilter};

/// Sending side of a mailbox, held by the platform router
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: Sender<Envelope>,
}

impl MailboxSender {
    /// Deposit an envelope without blocking
    ///
    /// Returns false when the owning process is gone; the message is dropped.
    pub fn deliver(&self, env: Envelope) -> bool {
        self.tx.send(env).is_ok()
    }
}

/// Receiving side of a mailbox, owned by the process thread
#[derive(Debug)]
pub struct Mailbox {
    rx: Receiver<Envelope>,
    backlog: VecDeque<Envelope>,
}

/// Create a connected sender/receiver pair
pub fn mailbox() -> (MailboxSender, Mailbox) {
    let (tx, rx) = unbounded();
    (
        MailboxSender { tx },
        Mailbox {
            rx,
            backlog: VecDeque::new(),
        },
    )
}

impl Mailbox {
    /// Non-blocking filtered poll
    ///
    /// Returns the oldest envelope matching `filter`, leaving everything
    /// else queued.
    pub fn poll(&mut self, filter: &MsgFilter) -> Option<Envelope> {
        self.drain();
        let idx = self.backlog.iter().position(|env| filter.matches(env))?;
        self.backlog.remove(idx)
    }

    /// Park until an envelope arrives or `timeout` passes
    ///
    /// An arriving envelope only wakes the caller; it still has to be
    /// claimed through `poll` by whichever task its filter belongs to.
    pub fn wait(&mut self, timeout: Duration) {
        match self.rx.recv_timeout(timeout) {
            Ok(env) => {
                self.backlog.push_back(env);
                self.drain();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // All senders gone; keep the backoff instead of spinning.
                std::thread::sleep(timeout);
            }
        }
    }

    /// Number of queued envelopes no filter has claimed yet
    pub fn backlog_len(&mut self) -> usize {
        self.drain();
        self.backlog.len()
    }

    fn drain(&mut self) {
        while let Ok(env) = self.rx.try_recv() {
            self.backlog.push_back(env);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Intent, Opcode};
    use crate::runtime::id::ProcessId;
    use std::time::Instant;

    fn envelope(opcode: Opcode, intent: Intent, from: &str) -> Envelope {
        Envelope::new(opcode, intent, ProcessId::new(from))
    }

    #[test]
    fn test_poll_returns_matching_envelope() {
        let (tx, mut mailbox) = mailbox();
        tx.deliver(envelope(Opcode::Completion, Intent::Inform, "compute-0"));

        let got = mailbox.poll(&MsgFilter::opcode(Opcode::Completion));
        assert!(got.is_some());
        assert_eq!(got.unwrap().sender.name(), "compute-0");
    }

    #[test]
    fn test_poll_on_empty_mailbox_is_none() {
        let (_tx, mut mailbox) = mailbox();
        assert!(mailbox.poll(&MsgFilter::opcode(Opcode::Completion)).is_none());
    }

    #[test]
    fn test_unmatched_envelopes_stay_queued() {
        let (tx, mut mailbox) = mailbox();
        tx.deliver(envelope(Opcode::RelocateOrder, Intent::Inform, "exchange-0"));
        tx.deliver(envelope(Opcode::Completion, Intent::Confirm, "coordinator"));

        // The completion filter skips over the relocate order.
        let confirm = mailbox.poll(
            &MsgFilter::opcode(Opcode::Completion).with_intent(Intent::Confirm),
        );
        assert!(confirm.is_some());

        // The skipped envelope is still there for its own handler.
        let order = mailbox.poll(&MsgFilter::opcode(Opcode::RelocateOrder));
        assert!(order.is_some());
        assert_eq!(mailbox.backlog_len(), 0);
    }

    #[test]
    fn test_same_filter_preserves_arrival_order() {
        let (tx, mut mailbox) = mailbox();
        tx.deliver(envelope(Opcode::Completion, Intent::Inform, "compute-1"));
        tx.deliver(envelope(Opcode::Completion, Intent::Inform, "compute-2"));

        let filter = MsgFilter::opcode(Opcode::Completion);
        assert_eq!(mailbox.poll(&filter).unwrap().sender.name(), "compute-1");
        assert_eq!(mailbox.poll(&filter).unwrap().sender.name(), "compute-2");
    }

    #[test]
    fn test_wait_wakes_early_on_delivery() {
        let (tx, mut mailbox) = mailbox();

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            tx.deliver(envelope(Opcode::Completion, Intent::Inform, "compute-0"));
        });

        let start = Instant::now();
        mailbox.wait(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(4));

        sender.join().unwrap();
        assert!(mailbox.poll(&MsgFilter::opcode(Opcode::Completion)).is_some());
    }

    #[test]
    fn test_deliver_to_dropped_mailbox_reports_loss() {
        let (tx, mailbox) = mailbox();
        drop(mailbox);
        assert!(!tx.deliver(envelope(Opcode::Completion, Intent::Inform, "compute-0")));
    }
}
