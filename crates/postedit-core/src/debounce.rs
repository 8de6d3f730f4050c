//! Debounce / cooldown controller.
//!
//! Rapid successive triggers are collapsed: a trigger arriving within the
//! cooldown window of the previous one is deferred and its event dropped.
//! Every trigger, deferred or not, moves the window forward.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::{self, StateStore};

/// Store key holding the last trigger timestamp.
pub const DEBOUNCE_KEY: &str = "last-trigger";

/// Persisted debounce slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebounceState {
    pub last_trigger_epoch_seconds: f64,
}

/// Outcome of checking a trigger against the cooldown window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DebounceDecision {
    /// Outside the window; run the pipeline.
    Proceed,
    /// Inside the window; skip this trigger.
    Defer { elapsed_secs: f64 },
}

/// Current wall-clock time as fractional epoch seconds.
pub fn now_epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Reads and writes the last-trigger slot.
#[derive(Clone)]
pub struct DebounceController {
    store: Arc<dyn StateStore>,
}

impl DebounceController {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Last recorded trigger, `None` if absent or unreadable.
    pub fn last_trigger(&self) -> Option<DebounceState> {
        let raw = match self.store.get(DEBOUNCE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Debounce state unreadable, treating as absent");
                return None;
            }
        };

        match serde_json::from_str::<DebounceState>(&raw) {
            Ok(state) if state.last_trigger_epoch_seconds.is_finite() => Some(state),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Debounce state corrupt, treating as absent");
                None
            }
        }
    }

    pub fn should_defer(&self, cooldown_secs: f64) -> bool {
        self.should_defer_at(now_epoch_seconds(), cooldown_secs)
    }

    /// True when the last trigger lies within `cooldown_secs` before `now`.
    ///
    /// A timestamp in the future (clock skew) never defers.
    pub fn should_defer_at(&self, now: f64, cooldown_secs: f64) -> bool {
        match self.last_trigger() {
            Some(state) => {
                let elapsed = now - state.last_trigger_epoch_seconds;
                (0.0..cooldown_secs).contains(&elapsed)
            }
            None => false,
        }
    }

    pub fn record_trigger(&self) -> state::Result<()> {
        self.record_trigger_at(now_epoch_seconds())
    }

    /// Overwrite the slot with `now`.
    pub fn record_trigger_at(&self, now: f64) -> state::Result<()> {
        let value = serde_json::to_string(&DebounceState {
            last_trigger_epoch_seconds: now,
        })
        .map_err(|e| crate::error::StateError::Corrupt {
            key: DEBOUNCE_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(DEBOUNCE_KEY, &value)
    }

    /// Check the window and record this trigger in one step.
    ///
    /// The record happens on both paths. Write failures are logged and
    /// otherwise ignored.
    pub fn check_and_record_at(&self, now: f64, cooldown_secs: f64) -> DebounceDecision {
        let decision = match self.last_trigger() {
            Some(state) if self.should_defer_at(now, cooldown_secs) => DebounceDecision::Defer {
                elapsed_secs: now - state.last_trigger_epoch_seconds,
            },
            _ => DebounceDecision::Proceed,
        };

        if let Err(e) = self.record_trigger_at(now) {
            tracing::warn!(error = %e, "Failed to record trigger time, continuing");
        }

        decision
    }

    /// Explicit cleanup: forget the last trigger.
    pub fn reset(&self) -> state::Result<()> {
        self.store.remove(DEBOUNCE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryStateStore;

    fn controller() -> DebounceController {
        DebounceController::new(Arc::new(MemoryStateStore::new()))
    }

    #[test]
    fn test_no_state_does_not_defer() {
        let c = controller();
        assert!(!c.should_defer_at(100.0, 5.0));
    }

    #[test]
    fn test_defer_within_window_then_proceed() {
        let c = controller();
        c.record_trigger_at(0.0).unwrap();
        assert!(c.should_defer_at(2.0, 5.0));
        assert_eq!(
            c.check_and_record_at(2.0, 5.0),
            DebounceDecision::Defer { elapsed_secs: 2.0 }
        );
        assert!(!c.should_defer_at(10.0, 5.0));
        assert_eq!(c.check_and_record_at(10.0, 5.0), DebounceDecision::Proceed);
    }

    #[test]
    fn test_should_defer_is_idempotent() {
        let c = controller();
        c.record_trigger_at(0.0).unwrap();
        let first = c.should_defer_at(1.0, 5.0);
        let second = c.should_defer_at(1.0, 5.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_deferral_extends_window() {
        let c = controller();
        c.check_and_record_at(0.0, 5.0);
        c.check_and_record_at(4.0, 5.0);
        // 8s after the first trigger but only 4s after the deferred one.
        assert!(c.should_defer_at(8.0, 5.0));
    }

    #[test]
    fn test_future_timestamp_does_not_defer() {
        let c = controller();
        c.record_trigger_at(1_000.0).unwrap();
        assert!(!c.should_defer_at(10.0, 5.0));
    }

    #[test]
    fn test_zero_cooldown_never_defers() {
        let c = controller();
        c.record_trigger_at(5.0).unwrap();
        assert!(!c.should_defer_at(5.0, 0.0));
    }

    #[test]
    fn test_corrupt_state_does_not_defer() {
        let store = Arc::new(MemoryStateStore::new());
        store.set(DEBOUNCE_KEY, "not json").unwrap();
        let c = DebounceController::new(store);
        assert!(c.last_trigger().is_none());
        assert!(!c.should_defer_at(1.0, 5.0));
    }

    #[test]
    fn test_write_failure_is_non_fatal() {
        let c = DebounceController::new(Arc::new(MemoryStateStore::read_only()));
        assert!(c.record_trigger_at(1.0).is_err());
        assert_eq!(c.check_and_record_at(1.0, 5.0), DebounceDecision::Proceed);
    }

    #[test]
    fn test_reset_clears_window() {
        let c = controller();
        c.record_trigger_at(0.0).unwrap();
        c.reset().unwrap();
        assert!(!c.should_defer_at(1.0, 5.0));
    }

    #[test]
    fn test_now_is_recent() {
        assert!(now_epoch_seconds() > 1_600_000_000.0);
    }
}
