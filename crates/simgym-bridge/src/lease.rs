//! Exclusive claims on simulation resources
//!
//! One shared segment and one simulation process cannot be multiplexed, so at
//! most one live bridge may hold a given resource id.

use simgym_core::{GymError, Result};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::debug;

static ACTIVE: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

fn active() -> std::sync::MutexGuard<'static, BTreeSet<String>> {
    // The set stays consistent even if a holder panicked
    ACTIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Claim on a resource id, released on drop
#[derive(Debug)]
pub struct ResourceLease {
    id: String,
}

impl ResourceLease {
    /// Claim `id`, failing with `AlreadyActive` if it is held elsewhere
    pub fn acquire(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !active().insert(id.clone()) {
            return Err(GymError::AlreadyActive(id));
        }
        debug!("Acquired lease on {}", id);
        Ok(Self { id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether some live lease holds `id`
    pub fn is_held(id: &str) -> bool {
        active().contains(id)
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        active().remove(&self.id);
        debug!("Released lease on {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_rejected() {
        let first = ResourceLease::acquire("lease-test-a").unwrap();
        let err = ResourceLease::acquire("lease-test-a").unwrap_err();
        assert!(matches!(err, GymError::AlreadyActive(ref id) if id == "lease-test-a"));
        assert!(ResourceLease::is_held(first.id()));
    }

    #[test]
    fn test_released_on_drop() {
        let lease = ResourceLease::acquire("lease-test-b").unwrap();
        drop(lease);
        assert!(!ResourceLease::is_held("lease-test-b"));
        assert!(ResourceLease::acquire("lease-test-b").is_ok());
    }
}
