//! Process-wide handle registry
//!
//! One instance is built at startup and shared by every connection worker
//! behind an `Arc`. The mutex makes `/register` an atomic check-then-insert:
//! two concurrent registrations of the same handle can never both succeed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Connection metadata kept per registered handle.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub registered_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<HashMap<String, PeerInfo>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `handle` for `addr`. Returns false if a live connection already
    /// holds it; the existing entry is never displaced.
    pub fn register(&self, handle: &str, addr: SocketAddr) -> bool {
        let mut map = self.inner.lock();
        if map.contains_key(handle) {
            return false;
        }
        map.insert(
            handle.to_string(),
            PeerInfo {
                addr,
                registered_at: Utc::now(),
            },
        );
        true
    }

    /// Release `handle`. Idempotent; workers call this unconditionally on
    /// teardown whether or not the session ever registered.
    pub fn unregister(&self, handle: &str) {
        self.inner.lock().remove(handle);
    }

    pub fn exists(&self, handle: &str) -> bool {
        self.inner.lock().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
