//! Inbound frame classification.
//!
//! Each frame is either a correlated response (resolved through the
//! registry) or an unsolicited `deviceParams` push (queued for the
//! session's push-dispatch task). Everything else is logged and dropped;
//! a bad frame never tears down the read loop.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::correlation::CorrelationRegistry;
use crate::protocol::ResponseEnvelope;

/// Push payloads travel through a queue rather than being handed to the
/// observer inside the read loop, so an observer that issues new requests
/// cannot deadlock the loop that resolves them.
pub(crate) type PushQueue = mpsc::UnboundedSender<Map<String, Value>>;

pub(crate) struct MessageRouter {
    registry: Arc<CorrelationRegistry>,
    push_tx: PushQueue,
}

impl MessageRouter {
    pub fn new(registry: Arc<CorrelationRegistry>, push_tx: PushQueue) -> Self {
        Self { registry, push_tx }
    }

    /// Classify and dispatch one inbound text frame.
    pub fn route(&self, text: &str) {
        let envelope: ResponseEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, frame = text, "dropping malformed frame");
                return;
            }
        };

        // A matching pending id wins; unmatched envelopes fall through to
        // the push check (resolve logs the miss).
        let unmatched = match envelope.id {
            Some(id) => match self.registry.resolve(id, envelope) {
                Some(envelope) => envelope,
                None => return,
            },
            None => envelope,
        };

        if unmatched.is_push() {
            let data = match unmatched.data {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            // Fails only when the session is tearing down.
            let _ = self.push_tx.send(data);
        } else {
            debug!(
                command = unmatched.command.as_deref().unwrap_or("<none>"),
                "ignoring unrecognized message"
            );
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn router() -> (
        MessageRouter,
        Arc<CorrelationRegistry>,
        mpsc::UnboundedReceiver<Map<String, Value>>,
    ) {
        let registry = Arc::new(CorrelationRegistry::default());
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        (
            MessageRouter::new(Arc::clone(&registry), push_tx),
            registry,
            push_rx,
        )
    }

    #[tokio::test]
    async fn correlated_response_resolves_its_waiter() {
        let (router, registry, mut push_rx) = router();
        let waiter = registry.register(4).unwrap();

        router.route(r#"{"id": 4, "status": "ok", "data": {"fanlevel": 2}}"#);

        let envelope = registry
            .await_response(4, waiter, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(envelope.data_object()["fanlevel"], 2);
        assert!(push_rx.try_recv().is_err(), "response must not be queued as push");
    }

    #[tokio::test]
    async fn push_is_queued_and_resolves_no_waiter() {
        let (router, registry, mut push_rx) = router();
        let _waiter = registry.register(1).unwrap();

        router.route(r#"{"command": "deviceParams", "data": {"fanlevel": 5, "timer": "off"}}"#);

        let data = push_rx.try_recv().unwrap();
        assert_eq!(data["fanlevel"], json!(5));
        assert_eq!(registry.pending_count(), 1, "push must not consume a waiter");
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped() {
        let (router, registry, mut push_rx) = router();
        let _waiter = registry.register(1).unwrap();

        router.route("not json at all");

        assert_eq!(registry.pending_count(), 1);
        assert!(push_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unrecognized_message_is_dropped() {
        let (router, _registry, mut push_rx) = router();

        router.route(r#"{"command": "somethingElse", "data": {}}"#);
        router.route(r#"{"status": "ok"}"#);

        assert!(push_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn push_with_missing_data_yields_empty_map() {
        let (router, _registry, mut push_rx) = router();

        router.route(r#"{"command": "deviceParams"}"#);

        let data = push_rx.try_recv().unwrap();
        assert!(data.is_empty());
    }
}
