//! Session seam
//!
//! The client never owns the web session. It writes the PGT and the proxy
//! list after a successful CAS 2.0/3.0 validation and tears the session down
//! on an authorized logout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Drops all session data
    async fn invalidate(&self) -> Result<()>;

    /// Issues a new session id, optionally dropping the old session's data
    async fn migrate(&self, destroy: bool) -> Result<()>;
}

/// A [`SessionStore`] kept in memory, for single-process use and tests
#[derive(Debug, Default)]
pub struct MemorySession {
    state: Mutex<MemorySessionState>,
}

#[derive(Debug, Default)]
struct MemorySessionState {
    values: BTreeMap<String, Value>,
    generation: u64,
    invalidated: bool,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().values.get(key).cloned()
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.lock().invalidated
    }

    /// Incremented on every migration
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

#[async_trait]
impl SessionStore for MemorySession {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock();
        state.values.insert(key.to_string(), value);
        state.invalidated = false;
        Ok(())
    }

    async fn invalidate(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.values.clear();
        state.generation += 1;
        state.invalidated = true;
        Ok(())
    }

    async fn migrate(&self, destroy: bool) -> Result<()> {
        let mut state = self.state.lock();
        if destroy {
            state.values.clear();
        }
        state.generation += 1;
        Ok(())
    }
}
