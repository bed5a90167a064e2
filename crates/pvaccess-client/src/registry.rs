//! Per-channel map from request id to request.
//!
//! The map has its own lock, separate from every request's state lock, and is
//! never held while a request is called: broadcasts take a snapshot first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::pvdata::lock;
use crate::request::Request;

/// Requests registered on one channel.
pub struct RequestRegistry {
    requests: Mutex<HashMap<u32, Arc<Request>>>,
    needs_update: AtomicBool,
}

impl RequestRegistry {
    /// Creates an empty registry that still owes its first resubscription.
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            needs_update: AtomicBool::new(true),
        }
    }

    /// Adds `request` under its id, replacing any stale entry.
    pub fn register(&self, request: Arc<Request>) {
        lock(&self.requests).insert(request.ioid(), request);
    }

    /// Removes and returns the request with id `ioid`.
    pub fn unregister(&self, ioid: u32) -> Option<Arc<Request>> {
        lock(&self.requests).remove(&ioid)
    }

    /// Looks up a request.
    pub fn get(&self, ioid: u32) -> Option<Arc<Request>> {
        lock(&self.requests).get(&ioid).cloned()
    }

    /// Copies the current requests, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<Request>> {
        let mut requests: Vec<Arc<Request>> = lock(&self.requests).values().cloned().collect();
        requests.sort_by_key(|r| r.ioid());
        requests
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Returns true if no request is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records that registered requests must be re-initialised on the next
    /// connection.
    pub fn mark_needs_update(&self) {
        self.needs_update.store(true, Ordering::Release);
    }

    /// Consumes the resubscription flag. Only one caller sees `true`.
    pub fn take_needs_update(&self) -> bool {
        self.needs_update.swap(false, Ordering::AcqRel)
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_update_is_consumed_once() {
        let registry = RequestRegistry::new();
        assert!(registry.take_needs_update());
        assert!(!registry.take_needs_update());
        registry.mark_needs_update();
        registry.mark_needs_update();
        assert!(registry.take_needs_update());
        assert!(!registry.take_needs_update());
    }

    #[test]
    fn test_empty_registry() {
        let registry = RequestRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
        assert!(registry.get(1).is_none());
        assert!(registry.unregister(1).is_none());
    }
}
