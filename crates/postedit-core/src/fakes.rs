//! In-memory fakes for storage traits (testing only)

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StateError;
use crate::state::{Result, StateStore};

/// In-memory state store backed by a `HashMap<key, value>`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    slots: Mutex<HashMap<String, String>>,
    fail_writes: bool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `set` and `remove` always fail.
    pub fn read_only() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            fail_writes: true,
        }
    }

    fn denied() -> StateError {
        StateError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "memory store is read-only",
        ))
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let slots = self.slots.lock().unwrap();
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            return Err(Self::denied());
        }
        let mut slots = self.slots.lock().unwrap();
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes {
            return Err(Self::denied());
        }
        let mut slots = self.slots.lock().unwrap();
        slots.remove(key);
        Ok(())
    }
}
