//! Shared session state
//!
//! `SessionState` is the mutable key-value mapping owned by a workflow and
//! visible by reference to every unit of a run. Clones share the same map.
//!
//! Each individual operation takes the lock for its own duration only.
//! Siblings of a parallel group that write the same key race, and the last
//! writer wins; there is no merge policy across concurrent writers. Use
//! [`SessionState::update`] to apply several mutations atomically.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock};

/// Well-known keys written by the workflow driver
pub mod keys {
    /// Name of the running workflow
    pub const WORKFLOW_NAME: &str = "workflow_name";
    /// Identifier of the current run
    pub const RUN_ID: &str = "run_id";
    /// Session identifier
    pub const SESSION_ID: &str = "session_id";
    /// User identifier, when the caller supplied one
    pub const USER_ID: &str = "user_id";
}

/// Shared mutable mapping visible to every unit in a run
///
/// # Example
///
/// ```
/// use agent_core::SessionState;
///
/// let state = SessionState::new();
/// let view = state.clone();
/// view.insert("topic", serde_json::json!("rust"));
///
/// assert_eq!(state.get("topic"), Some(serde_json::json!("rust")));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    data: Arc<RwLock<Map<String, Value>>>,
}

impl SessionState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state seeded with `data`
    pub fn from_map(data: Map<String, Value>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Map<String, Value>) -> R) -> R {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    // =========== Generic Key-Value Operations ===========

    /// Insert a value, returning the previous one
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.write(|m| m.insert(key.into(), value))
    }

    /// Get a copy of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read(|m| m.get(key).cloned())
    }

    /// Insert a typed value
    ///
    /// Serializes the value to JSON before storing.
    pub fn insert_typed<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> crate::Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.insert(key, json_value);
        Ok(())
    }

    /// Get a typed value
    ///
    /// Deserializes the JSON value into the specified type.
    pub fn get_typed<T: for<'de> Deserialize<'de>>(&self, key: &str) -> crate::Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.read(|m| m.contains_key(key))
    }

    /// Remove a value
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write(|m| m.remove(key))
    }

    /// Clear all values
    pub fn clear(&self) {
        self.write(Map::clear);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.read(Map::len)
    }

    /// Check if the state is empty
    pub fn is_empty(&self) -> bool {
        self.read(Map::is_empty)
    }

    /// Merge entries into the state (incoming values override)
    pub fn merge(&self, other: Map<String, Value>) {
        self.write(|m| m.extend(other));
    }

    /// Point-in-time copy of the whole mapping
    pub fn snapshot(&self) -> Map<String, Value> {
        self.read(Clone::clone)
    }

    /// Apply several mutations under a single write lock
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        self.write(f)
    }

    /// Whether two handles share the same underlying map
    pub fn ptr_eq(&self, other: &SessionState) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    // =========== Common Accessors ===========

    /// Name of the running workflow
    pub fn workflow_name(&self) -> Option<String> {
        self.get_str(keys::WORKFLOW_NAME)
    }

    /// Identifier of the current run
    pub fn run_id(&self) -> Option<String> {
        self.get_str(keys::RUN_ID)
    }

    /// Session identifier
    pub fn session_id(&self) -> Option<String> {
        self.get_str(keys::SESSION_ID)
    }

    /// User identifier
    pub fn user_id(&self) -> Option<String> {
        self.get_str(keys::USER_ID)
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.read(|m| m.get(key).and_then(Value::as_str).map(str::to_string))
    }
}
