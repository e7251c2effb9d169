//! Process identity and pair naming
//!
//! Every process is known by a name unique within its platform. Compute and
//! exchange processes come in 1:1 pairs named by a shared convention
//! (`compute-<tag>` / `exchange-<tag>`), so each side derives its partner's
//! id at startup without a discovery lookup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Name prefix of compute processes
pub const COMPUTE_PREFIX: &str = "compute-";

/// Name prefix of exchange processes
pub const EXCHANGE_PREFIX: &str = "exchange-";

/// Process identifier
///
/// A platform-unique name plus zero or more reachable addresses for
/// cross-platform use. Identity is the name alone: two ids with the same
/// name refer to the same process regardless of their address lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessId {
    name: String,
    addresses: Vec<String>,
}

impl ProcessId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
        }
    }

    pub fn with_addresses(name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            addresses,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Record an address this process is reachable at from other platforms
    pub fn push_address(&mut self, address: impl Into<String>) {
        self.addresses.push(address.into());
    }
}

impl PartialEq for ProcessId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ProcessId {}

impl Hash for ProcessId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Name of worker `index`'s compute process
pub fn compute_name(index: usize) -> String {
    format!("{}{}", COMPUTE_PREFIX, index)
}

/// Name of worker `index`'s exchange process
pub fn exchange_name(index: usize) -> String {
    format!("{}{}", EXCHANGE_PREFIX, index)
}

/// Derive the paired process name by swapping the role prefix
///
/// Returns `None` for names outside the pair convention (for example the
/// coordinator's).
pub fn pair_name(name: &str) -> Option<String> {
    if let Some(tag) = name.strip_prefix(COMPUTE_PREFIX) {
        Some(format!("{}{}", EXCHANGE_PREFIX, tag))
    } else {
        name.strip_prefix(EXCHANGE_PREFIX)
            .map(|tag| format!("{}{}", COMPUTE_PREFIX, tag))
    }
}
