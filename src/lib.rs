//! optiswarm - Coordination layer for a migratory compute pool
//!
//! A swarm of compute processes works a shared optimization problem while
//! paired exchange processes shuttle them between nodes in response to load.
//! A transversal coordinator tracks the process holding the best result,
//! fetches that result exactly once, and runs the completion barrier that
//! drains the pool.
//!
//! # Architecture
//!
//! - **Runtime**: in-process platform with nodes, mailboxes, discovery, and
//!   cooperative task scheduling
//! - **Proto**: the envelope codec shared by every role (MessagePack payloads
//!   in base64 text)
//! - **Compute**: solver hosts that serve their result on demand and complete
//!   through a two-step handshake
//! - **Exchange**: load monitors that walk a node itinerary and drag their
//!   compute pair along
//! - **Coordinator**: best-result retrieval and the release barrier

pub mod compute;
pub mod config;
pub mod coordinator;
pub mod exchange;
pub mod proto;
pub mod report;
pub mod runtime;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use proto::Envelope;
pub use runtime::{Platform, ProcessId};

/// Result type used throughout optiswarm
pub type Result<T> = anyhow::Result<T>;
