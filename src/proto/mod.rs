//! Coordination protocol
//!
//! This module defines the message envelopes exchanged between compute
//! processes, exchange processes, and the transversal coordinator. Payloads
//! are serialized with MessagePack (rmp-serde) and transport-safe-encoded
//! with base64 (see `codec`).
//!
//! # Message Flow
//!
//! ```text
//! Exchange                      Compute                      Coordinator
//!    |                            |                               |
//!    |-- RELOCATE_ORDER/INFORM -->|                               |
//!    |                            |------ COMPLETION/INFORM ----->|
//!    |                            |<-- RETRIEVE_RESULT/QUERY -----|
//!    |                            |--- RETRIEVE_RESULT/INFORM --->|
//!    |                            |<----- COMPLETION/CONFIRM -----|
//!    |<-- COMPLETION/INFORM ------|                               |
//! ```
//!
//! # Encoding Tag
//!
//! Every payload-bearing message declares an encoding tag. Receivers ignore
//! or refuse messages whose tag does not match [`WIRE_ENCODING`]; a payload
//! produced by one codec must never be decoded by another.

pub mod codec;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::runtime::id::ProcessId;

/// Encoding tag declared on every payload-bearing message
pub const WIRE_ENCODING: &str = "rmp+base64";

/// Request body that selects the current result on RETRIEVE_RESULT/QUERY
pub const RESULT_QUERY: &str = "getSolution";

/// Operation selector
///
/// Each opcode names one conversation; intents qualify the step within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Pull the current result from a compute process
    ///
    /// QUERY carries the literal request body; INFORM carries the encoded
    /// result; REFUSE/REJECT carry a reason.
    RetrieveResult,

    /// Order the paired compute process to follow to a node
    ///
    /// INFORM carries the target node name as plain text.
    RelocateOrder,

    /// Completion signaling and release confirmation
    ///
    /// INFORM signals "finished" upward; CONFIRM authorizes termination.
    /// Carries no payload.
    Completion,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::RetrieveResult => "RETRIEVE_RESULT",
            Opcode::RelocateOrder => "RELOCATE_ORDER",
            Opcode::Completion => "COMPLETION",
        };
        write!(f, "{}", s)
    }
}

/// Communicative intent of a message within its opcode's conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    /// Ask the receiver to act or answer
    Query,
    /// Deliver information or a requested value
    Inform,
    /// Acknowledge and authorize
    Confirm,
    /// Decline a well-formed request, with a reason
    Refuse,
    /// Report a message as not understood
    Reject,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Query => "QUERY",
            Intent::Inform => "INFORM",
            Intent::Confirm => "CONFIRM",
            Intent::Refuse => "REFUSE",
            Intent::Reject => "REJECT",
        };
        write!(f, "{}", s)
    }
}

/// Message envelope
///
/// The unit of exchange between processes. Envelopes are immutable once
/// sent; replies are fresh envelopes built with [`Envelope::reply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub opcode: Opcode,
    pub intent: Intent,

    /// Payload encoding tag; `None` on payload-free messages
    pub encoding: Option<String>,

    pub sender: ProcessId,
    pub receivers: Vec<ProcessId>,

    /// Text payload: a request body, a node name, or an encoded result
    pub payload: Option<String>,
}

impl Envelope {
    pub fn new(opcode: Opcode, intent: Intent, sender: ProcessId) -> Self {
        Self {
            opcode,
            intent,
            encoding: None,
            sender,
            receivers: Vec::new(),
            payload: None,
        }
    }

    /// Add a receiver
    pub fn to(mut self, receiver: ProcessId) -> Self {
        self.receivers.push(receiver);
        self
    }

    /// Declare the standard encoding tag
    pub fn with_encoding(mut self) -> Self {
        self.encoding = Some(WIRE_ENCODING.to_string());
        self
    }

    /// Attach a text payload
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Whether the declared encoding tag matches [`WIRE_ENCODING`]
    pub fn encoding_matches(&self) -> bool {
        self.encoding.as_deref() == Some(WIRE_ENCODING)
    }

    /// Build a reply on the same opcode, addressed back to the sender
    pub fn reply(&self, sender: ProcessId, intent: Intent) -> Envelope {
        Envelope {
            opcode: self.opcode,
            intent,
            encoding: None,
            sender,
            receivers: vec![self.sender.clone()],
            payload: None,
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} from {}", self.opcode, self.intent, self.sender.name())
    }
}

/// Selection filter for polling a mailbox
///
/// Matches on opcode, optionally narrowed by intent and sender name.
/// Receivers poll with a filter so unrelated conversations stay queued for
/// their own handlers.
#[derive(Debug, Clone)]
pub struct MsgFilter {
    pub opcode: Opcode,
    pub intent: Option<Intent>,
    pub sender: Option<String>,
}

impl MsgFilter {
    pub fn opcode(opcode: Opcode) -> Self {
        Self {
            opcode,
            intent: None,
            sender: None,
        }
    }

    /// Narrow to one intent
    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Narrow to one sender, by name
    pub fn from_sender(mut self, name: impl Into<String>) -> Self {
        self.sender = Some(name.into());
        self
    }

    pub fn matches(&self, env: &Envelope) -> bool {
        if env.opcode != self.opcode {
            return false;
        }
        if let Some(intent) = self.intent {
            if env.intent != intent {
                return false;
            }
        }
        if let Some(sender) = &self.sender {
            if env.sender.name() != sender {
                return false;
            }
        }
        true
    }
}
