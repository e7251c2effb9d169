//! Tagged name/value collections
//!
//! Processes carry their tunable parameters as named values: a tag that is
//! unique within the owning collection plus an untyped-at-the-boundary value.
//! Entries are compared by name only, so updating a value in place never
//! changes the entry's identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single tagged value.
///
/// Equality considers only the name: two entries with the same name are the
/// same entry regardless of their current values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedValue<V> {
    pub name: String,
    pub value: V,
}

impl<V> NamedValue<V> {
    pub fn new(name: impl Into<String>, value: V) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl<V> PartialEq for NamedValue<V> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<V> Eq for NamedValue<V> {}

impl<V: fmt::Display> fmt::Display for NamedValue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// An ordered collection of named values, unique by name.
///
/// Lookup, update, and removal all key on the name. `set` with `None`
/// removes the entry; `get` on an absent name returns `None` (the not-found
/// signal at this boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSet<V> {
    items: Vec<NamedValue<V>>,
}

impl<V> ValueSet<V> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Update or insert the entry for `name`; `None` removes it.
    pub fn set(&mut self, name: &str, value: Option<V>) {
        match value {
            Some(v) => match self.items.iter_mut().find(|e| e.name == name) {
                Some(entry) => entry.value = v,
                None => self.items.push(NamedValue::new(name, v)),
            },
            None => self.items.retain(|e| e.name != name),
        }
    }

    /// Look up the value for `name`.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.items.iter().find(|e| e.name == name).map(|e| &e.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedValue<V>> {
        self.items.iter()
    }
}

impl<V> Default for ValueSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Display> fmt::Display for ValueSet<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.items {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", entry)?;
            first = false;
        }
        Ok(())
    }
}
