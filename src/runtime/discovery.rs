//! Discovery directory
//!
//! A platform-wide register/query/deregister directory keyed by service type
//! and process name. Calls are synchronous and fallible; they are never
//! retried automatically, and callers treat failures as non-fatal (a process
//! may simply end up unregistered).

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::runtime::id::ProcessId;

/// Discovery failure
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("process {0} is already registered")]
    AlreadyRegistered(String),

    #[error("process {0} is not registered")]
    NotRegistered(String),
}

#[derive(Debug, Clone)]
struct Registration {
    service_type: String,
    id: ProcessId,
}

/// Service directory shared by every process on the platform
#[derive(Debug, Default)]
pub struct Directory {
    entries: Mutex<HashMap<String, Registration>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` under `service_type`
    ///
    /// A name can hold at most one registration at a time.
    pub fn register(&self, service_type: &str, id: &ProcessId) -> Result<(), DiscoveryError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(id.name()) {
            return Err(DiscoveryError::AlreadyRegistered(id.name().to_string()));
        }
        entries.insert(
            id.name().to_string(),
            Registration {
                service_type: service_type.to_string(),
                id: id.clone(),
            },
        );
        Ok(())
    }

    /// All ids currently registered under `service_type`, ordered by name
    pub fn query(&self, service_type: &str) -> Vec<ProcessId> {
        let entries = self.entries.lock().unwrap();
        let mut ids: Vec<ProcessId> = entries
            .values()
            .filter(|r| r.service_type == service_type)
            .map(|r| r.id.clone())
            .collect();
        ids.sort_by(|a, b| a.name().cmp(b.name()));
        ids
    }

    /// Remove the registration held by `name`
    pub fn deregister(&self, name: &str) -> Result<(), DiscoveryError> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DiscoveryError::NotRegistered(name.to_string()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.lock().unwrap().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_query_finds_id() {
        let dir = Directory::new();
        dir.register("exchange", &ProcessId::new("exchange-0")).unwrap();

        let found = dir.query("exchange");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "exchange-0");
    }

    #[test]
    fn test_query_filters_by_service_type() {
        let dir = Directory::new();
        dir.register("exchange", &ProcessId::new("exchange-0")).unwrap();
        dir.register("coordinator", &ProcessId::new("coordinator")).unwrap();

        assert_eq!(dir.query("exchange").len(), 1);
        assert_eq!(dir.query("coordinator").len(), 1);
        assert!(dir.query("unknown").is_empty());
    }

    #[test]
    fn test_query_orders_by_name() {
        let dir = Directory::new();
        dir.register("exchange", &ProcessId::new("exchange-2")).unwrap();
        dir.register("exchange", &ProcessId::new("exchange-0")).unwrap();
        dir.register("exchange", &ProcessId::new("exchange-1")).unwrap();

        let found = dir.query("exchange");
        let names: Vec<&str> = found.iter().map(|id| id.name()).collect();
        assert_eq!(names, vec!["exchange-0", "exchange-1", "exchange-2"]);
    }

    #[test]
    fn test_duplicate_register_is_rejected() {
        let dir = Directory::new();
        let id = ProcessId::new("exchange-0");
        dir.register("exchange", &id).unwrap();

        let err = dir.register("exchange", &id).unwrap_err();
        assert!(matches!(err, DiscoveryError::AlreadyRegistered(_)));
        assert_eq!(dir.query("exchange").len(), 1);
    }

    #[test]
    fn test_second_deregister_fails_without_corrupting_state() {
        let dir = Directory::new();
        dir.register("exchange", &ProcessId::new("exchange-0")).unwrap();
        dir.register("exchange", &ProcessId::new("exchange-1")).unwrap();

        dir.deregister("exchange-0").unwrap();
        let err = dir.deregister("exchange-0").unwrap_err();
        assert!(matches!(err, DiscoveryError::NotRegistered(_)));

        // The sibling registration is untouched and the name is reusable.
        assert_eq!(dir.query("exchange").len(), 1);
        dir.register("exchange", &ProcessId::new("exchange-0")).unwrap();
        assert_eq!(dir.query("exchange").len(), 2);
    }
}
