//! Request/response correlation.
//!
//! Every outbound request registers a one-shot waiter keyed by its id.
//! The read loop resolves waiters as responses arrive; teardown fails
//! every outstanding waiter so no caller hangs on a dead connection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Error;
use crate::protocol::ResponseEnvelope;

type Waiter = oneshot::Sender<Result<ResponseEnvelope, Error>>;
pub(crate) type WaiterHandle = oneshot::Receiver<Result<ResponseEnvelope, Error>>;

/// Tracks in-flight requests and resolves each exactly once.
///
/// Instance-scoped: each client owns its own registry, so multiple device
/// sessions in one process cannot cross-talk. The mutex serializes
/// `register` against `resolve`/`fail_all` -- a registration is visible
/// before any resolution targeting its id is processed.
#[derive(Default)]
pub(crate) struct CorrelationRegistry {
    pending: Mutex<HashMap<u64, Waiter>>,
}

impl CorrelationRegistry {
    /// Create a waiter for `id`.
    ///
    /// Ids are allocated monotonically, so a collision means a logic bug
    /// upstream; it is rejected rather than silently replacing a waiter.
    pub fn register(&self, id: u64) -> Result<WaiterHandle, Error> {
        let mut pending = self.pending.lock().expect("registry lock poisoned");
        if pending.contains_key(&id) {
            return Err(Error::DuplicateRequestId { id });
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    /// Resolve the waiter for `id` with `envelope`.
    ///
    /// When no waiter exists -- late replies after a timeout, duplicate
    /// responses -- the envelope is handed back so the caller can decide
    /// whether it is something else entirely.
    pub fn resolve(&self, id: u64, envelope: ResponseEnvelope) -> Option<ResponseEnvelope> {
        let waiter = self
            .pending
            .lock()
            .expect("registry lock poisoned")
            .remove(&id);

        match waiter {
            Some(tx) => {
                // Send only fails if the caller gave up; nothing to do then.
                let _ = tx.send(Ok(envelope));
                None
            }
            None => {
                debug!(id, "no pending request for response id");
                Some(envelope)
            }
        }
    }

    /// Drop the waiter for `id` without resolving it.
    pub fn remove(&self, id: u64) {
        self.pending
            .lock()
            .expect("registry lock poisoned")
            .remove(&id);
    }

    /// Force-resolve every pending waiter with a connection-closed error.
    /// Safe to call when empty and safe to call repeatedly.
    pub fn fail_all(&self) {
        let waiters: Vec<(u64, Waiter)> = self
            .pending
            .lock()
            .expect("registry lock poisoned")
            .drain()
            .collect();

        if !waiters.is_empty() {
            debug!(count = waiters.len(), "failing all pending requests");
        }
        for (_, tx) in waiters {
            let _ = tx.send(Err(Error::connect("connection closed")));
        }
    }

    /// Suspend until the waiter resolves or `timeout` elapses.
    ///
    /// On timeout the id is unregistered first, so a reply racing the
    /// deadline can never resolve a waiter nobody is listening to.
    pub async fn await_response(
        &self,
        id: u64,
        waiter: WaiterHandle,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, Error> {
        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(result)) => result,
            // Sender dropped without resolving: connection torn down.
            Ok(Err(_)) => Err(Error::connect("connection closed")),
            Err(_) => {
                self.remove(id);
                Err(Error::Timeout {
                    id,
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("registry lock poisoned").len()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn ok_response(id: u64) -> ResponseEnvelope {
        serde_json::from_value(serde_json::json!({ "id": id, "status": "ok" })).unwrap()
    }

    #[tokio::test]
    async fn register_then_resolve_delivers_the_envelope() {
        let registry = CorrelationRegistry::default();
        let waiter = registry.register(1).unwrap();

        assert!(registry.resolve(1, ok_response(1)).is_none());

        let envelope = registry
            .await_response(1, waiter, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(envelope.id, Some(1));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = CorrelationRegistry::default();
        let _waiter = registry.register(5).unwrap();

        let err = registry.register(5).unwrap_err();
        assert!(matches!(err, Error::DuplicateRequestId { id: 5 }));
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_dropped_without_touching_other_waiters() {
        let registry = CorrelationRegistry::default();
        let waiter = registry.register(1).unwrap();

        assert!(registry.resolve(99, ok_response(99)).is_some());
        assert_eq!(registry.pending_count(), 1);

        assert!(registry.resolve(1, ok_response(1)).is_none());
        let envelope = registry
            .await_response(1, waiter, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(envelope.id, Some(1));
    }

    #[tokio::test]
    async fn waiters_resolve_out_of_send_order() {
        let registry = CorrelationRegistry::default();
        let first = registry.register(1).unwrap();
        let second = registry.register(2).unwrap();

        registry.resolve(2, ok_response(2));
        registry.resolve(1, ok_response(1));

        let second = registry
            .await_response(2, second, Duration::from_secs(1))
            .await
            .unwrap();
        let first = registry
            .await_response(1, first, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
    }

    #[tokio::test]
    async fn fail_all_resolves_every_waiter_with_a_connection_error() {
        let registry = CorrelationRegistry::default();
        let waiters: Vec<_> = (1..=3).map(|id| registry.register(id).unwrap()).collect();

        registry.fail_all();
        assert_eq!(registry.pending_count(), 0);

        for (id, waiter) in (1..=3).zip(waiters) {
            let err = registry
                .await_response(id, waiter, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(err.is_connection(), "expected connection error, got {err:?}");
        }

        // Safe on an empty registry.
        registry.fail_all();
    }

    #[tokio::test]
    async fn timeout_unregisters_the_waiter() {
        let registry = CorrelationRegistry::default();
        let waiter = registry.register(1).unwrap();

        let err = registry
            .await_response(1, waiter, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert_eq!(registry.pending_count(), 0);

        // A late reply is a no-op.
        assert!(registry.resolve(1, ok_response(1)).is_some());
    }
}
