//! One live session per ring.
//!
//! A [`SessionRegistry`] hands out [`SessionClaim`]s keyed by device
//! identity. A claim releases its identity when dropped, so a session that
//! ends for any reason frees the ring for the next connect.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::LinkError;

/// Registry of device identities that currently have a live session.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `device_id`, failing with [`LinkError::SessionActive`] if it is
    /// already held.
    pub fn claim(&self, device_id: &str) -> Result<SessionClaim, LinkError> {
        let key = normalize(device_id);
        if !self.lock().insert(key.clone()) {
            return Err(LinkError::SessionActive(device_id.to_string()));
        }
        debug!("Session claimed for {}", device_id);
        Ok(SessionClaim {
            registry: self.clone(),
            key,
        })
    }

    /// Whether `device_id` has a live session.
    pub fn is_active(&self, device_id: &str) -> bool {
        self.lock().contains(&normalize(device_id))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a device identity in its registry until dropped.
#[derive(Debug)]
pub struct SessionClaim {
    registry: SessionRegistry,
    key: String,
}

impl SessionClaim {
    /// The claimed identity, normalized.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
        debug!("Session released for {}", self.key);
    }
}

fn normalize(device_id: &str) -> String {
    device_id.trim().to_uppercase()
}
