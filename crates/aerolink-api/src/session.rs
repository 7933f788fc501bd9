//! Device session manager.
//!
//! Owns one logical connection: connect, authenticate, steady-state
//! request/response traffic, keepalive, disconnect. Three background
//! concerns run per connection -- the read loop draining inbound frames,
//! the keepalive loop, and the push-dispatch loop feeding the observer --
//! all guarded by one [`CancellationToken`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationRegistry;
use crate::error::Error;
use crate::protocol::{MAX_FAN_LEVEL, RequestEnvelope, ResponseEnvelope, command};
use crate::router::MessageRouter;
use crate::transport::Transport;

/// Callback invoked with the `data` object of each `deviceParams` push.
///
/// Called from the session's push-dispatch task, never from the read
/// loop, so it may issue new requests without deadlocking.
pub type PushObserver = Box<dyn Fn(Map<String, Value>) + Send + Sync>;

// ── Configuration ────────────────────────────────────────────────────

/// Static settings for one device connection.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub host: String,
    /// Device WebSocket port. Default: 443.
    pub port: u16,
    /// Default: `admin` (the firmware's factory account).
    pub username: String,
    pub password: SecretString,
    /// Connect with TLS. The device's self-signed certificate is
    /// accepted without verification. Default: `true`.
    pub use_tls: bool,
    /// Bound on the WebSocket handshake. Default: 10s.
    pub connect_timeout: Duration,
    /// Bound on each correlated response. Default: 10s.
    pub request_timeout: Duration,
    /// Spacing of `keepAlive` requests. Default: 30s.
    pub keepalive_interval: Duration,
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port: 443,
            username: "admin".into(),
            password,
            use_tls: true,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Everything owned by one live connection; dropped as a unit on
/// disconnect.
struct ConnectionState {
    transport: Arc<Transport>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Client for one Siegenia device.
///
/// Reusable across connect/disconnect cycles; the request-id counter is
/// never reset. All methods take `&self` -- the client is safe to share
/// behind an `Arc` and callers may issue requests concurrently.
pub struct DeviceClient {
    config: DeviceConfig,
    registry: Arc<CorrelationRegistry>,
    next_id: Arc<AtomicU64>,
    token: RwLock<Option<String>>,
    observer: Arc<RwLock<Option<PushObserver>>>,
    conn: Mutex<Option<ConnectionState>>,
}

impl DeviceClient {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            registry: Arc::new(CorrelationRegistry::default()),
            next_id: Arc::new(AtomicU64::new(0)),
            token: RwLock::new(None),
            observer: Arc::new(RwLock::new(None)),
            conn: Mutex::new(None),
        }
    }

    /// `true` while the transport is live. Reflects remote closes as
    /// soon as the read loop observes them.
    pub fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .expect("connection lock poisoned")
            .as_ref()
            .is_some_and(|state| state.transport.is_open())
    }

    /// Authentication token from the last successful login, if any.
    pub fn auth_token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    /// Register the push-data callback. At most one observer; a new one
    /// replaces the previous.
    pub fn set_push_observer<F>(&self, callback: F)
    where
        F: Fn(Map<String, Value>) + Send + Sync + 'static,
    {
        *self.observer.write().expect("observer lock poisoned") = Some(Box::new(callback));
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the channel and start the background loops.
    ///
    /// A no-op when already connected. On failure the client is left
    /// fully disconnected -- nothing is leaked, and `connect` may simply
    /// be called again.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.is_connected() {
            debug!("connect called on a live session");
            return Ok(());
        }
        // Reap loops left over from a connection the remote dropped.
        self.disconnect().await;

        let (transport, mut reader) = Transport::open(
            &self.config.host,
            self.config.port,
            self.config.use_tls,
            self.config.connect_timeout,
        )
        .await?;
        let transport = Arc::new(transport);
        let cancel = CancellationToken::new();

        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        let router = MessageRouter::new(Arc::clone(&self.registry), push_tx);

        // Read loop: route every inbound frame; when the stream ends,
        // nothing pending can complete anymore.
        let read_task = {
            let registry = Arc::clone(&self.registry);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        frame = reader.next_text() => match frame {
                            Some(text) => router.route(&text),
                            None => break,
                        },
                    }
                }
                registry.fail_all();
                debug!("read loop exited");
            })
        };

        // Push dispatch: drain the queue into the observer.
        let push_task = {
            let observer = Arc::clone(&self.observer);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let data = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        data = push_rx.recv() => match data {
                            Some(data) => data,
                            None => break,
                        },
                    };
                    match observer.read().expect("observer lock poisoned").as_ref() {
                        Some(callback) => callback(data),
                        None => debug!("push update with no observer registered"),
                    }
                }
            })
        };

        // Keepalive: best effort. A failure here only risks server-side
        // session expiry, which surfaces on the next real request, so the
        // loop stops rather than trying to repair the connection.
        let keepalive_task = {
            let transport = Arc::clone(&transport);
            let registry = Arc::clone(&self.registry);
            let next_id = Arc::clone(&self.next_id);
            let interval = self.config.keepalive_interval;
            let timeout = self.config.request_timeout;
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(interval) => {}
                    }
                    let result = request(
                        &transport,
                        &registry,
                        &next_id,
                        command::KEEP_ALIVE,
                        Some(json!({ "extend_session": true })),
                        timeout,
                    )
                    .await;
                    if let Err(e) = result {
                        warn!(error = %e, "keepalive failed, stopping keepalive loop");
                        break;
                    }
                    debug!("keepalive acknowledged");
                }
            })
        };

        *self.conn.lock().expect("connection lock poisoned") = Some(ConnectionState {
            transport,
            cancel,
            tasks: vec![read_task, push_task, keepalive_task],
        });
        Ok(())
    }

    /// Tear the session down: stop the loops, fail every pending request
    /// with a connection error, close the transport, forget the token.
    /// Idempotent and safe to call in any state.
    pub async fn disconnect(&self) {
        let state = self.conn.lock().expect("connection lock poisoned").take();
        let Some(state) = state else {
            return;
        };

        state.cancel.cancel();
        self.registry.fail_all();
        state.transport.close().await;
        for task in state.tasks {
            let _ = task.await;
        }
        *self.token.write().expect("token lock poisoned") = None;
        info!("disconnected from device");
    }

    // ── Authentication ───────────────────────────────────────────────

    /// Log in with the configured credentials.
    ///
    /// Returns `Ok(false)` when the device rejects the credentials or
    /// the response times out -- both are expected, retryable outcomes
    /// and the session stays connected. Transport failures are errors.
    pub async fn login(&self) -> Result<bool, Error> {
        let transport = self.current_transport()?;
        let id = self.allocate_id();
        let envelope = RequestEnvelope::login(
            id,
            &self.config.username,
            self.config.password.expose_secret(),
        );

        let response =
            match send_registered(&transport, &self.registry, id, &envelope, self.config.request_timeout)
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    warn!(error = %e, "login timed out");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

        if response.is_ok() {
            let token = response
                .data
                .as_ref()
                .and_then(|data| data.get("token"))
                .and_then(Value::as_str)
                .map(String::from);
            *self.token.write().expect("token lock poisoned") = token;
            info!(host = %self.config.host, "logged in to device");
            return Ok(true);
        }

        let rejected = Error::Authentication {
            message: response.status.unwrap_or_else(|| "unknown error".into()),
        };
        warn!(error = %rejected, "login rejected");
        Ok(false)
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Send one command and await its correlated response.
    ///
    /// The returned envelope is uninterpreted -- callers read `status`
    /// and `data` themselves. Most callers want the domain wrappers
    /// below instead.
    pub async fn send_request(
        &self,
        command: &str,
        params: Option<Value>,
    ) -> Result<ResponseEnvelope, Error> {
        let transport = self.current_transport()?;
        request(
            &transport,
            &self.registry,
            &self.next_id,
            command,
            params,
            self.config.request_timeout,
        )
        .await
    }

    /// Device identity: type, serial, firmware/hardware versions, name.
    pub async fn get_device_info(&self) -> Result<Map<String, Value>, Error> {
        Ok(self
            .send_request(command::GET_DEVICE, None)
            .await?
            .data_object())
    }

    /// Current operational parameters (fan level, timer, warnings, ...).
    pub async fn get_device_params(&self) -> Result<Map<String, Value>, Error> {
        Ok(self
            .send_request(command::GET_DEVICE_PARAMS, None)
            .await?
            .data_object())
    }

    /// Current device state.
    pub async fn get_device_state(&self) -> Result<Map<String, Value>, Error> {
        Ok(self
            .send_request(command::GET_DEVICE_STATE, None)
            .await?
            .data_object())
    }

    /// Switch the device on or off. `Ok(true)` iff the device accepted.
    pub async fn set_device_active(&self, active: bool) -> Result<bool, Error> {
        let params = json!({ "devicestate": { "deviceactive": active } });
        let response = self
            .send_request(command::SET_DEVICE_PARAMS, Some(params))
            .await?;
        Ok(response.is_ok())
    }

    /// Set the ventilation level, 0 (off) through 7.
    ///
    /// Out-of-range levels fail with [`Error::Validation`] before any
    /// frame is sent.
    pub async fn set_fan_level(&self, level: u8) -> Result<bool, Error> {
        if level > MAX_FAN_LEVEL {
            return Err(Error::Validation {
                field: "fan level",
                reason: format!("{level} is outside 0..={MAX_FAN_LEVEL}"),
            });
        }
        let response = self
            .send_request(command::SET_DEVICE_PARAMS, Some(json!({ "fanlevel": level })))
            .await?;
        Ok(response.is_ok())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn current_transport(&self) -> Result<Arc<Transport>, Error> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        match conn.as_ref() {
            Some(state) if state.transport.is_open() => Ok(Arc::clone(&state.transport)),
            Some(_) => Err(Error::connect("channel is not open")),
            None => Err(Error::connect("not connected to device")),
        }
    }
}

/// Allocate an id, send `command`, await the correlated response.
/// Shared by caller-facing requests and the keepalive loop.
async fn request(
    transport: &Transport,
    registry: &CorrelationRegistry,
    next_id: &AtomicU64,
    command: &str,
    params: Option<Value>,
    timeout: Duration,
) -> Result<ResponseEnvelope, Error> {
    let id = next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let envelope = RequestEnvelope::new(command, id, params);
    send_registered(transport, registry, id, &envelope, timeout).await
}

/// Register the waiter, write the frame, await the response. A send
/// failure unregisters the waiter so the id is not left dangling.
async fn send_registered(
    transport: &Transport,
    registry: &CorrelationRegistry,
    id: u64,
    envelope: &RequestEnvelope,
    timeout: Duration,
) -> Result<ResponseEnvelope, Error> {
    let waiter = registry.register(id)?;
    let text = serde_json::to_string(envelope).map_err(|e| Error::Protocol {
        message: format!("cannot encode request: {e}"),
    })?;

    debug!(id, command = %envelope.command, "sending request");
    if let Err(e) = transport.send(text).await {
        registry.remove(id);
        return Err(e);
    }
    registry.await_response(id, waiter, timeout).await
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn client() -> DeviceClient {
        let config = DeviceConfig::new("127.0.0.1", SecretString::from("0000"));
        DeviceClient::new(config)
    }

    #[test]
    fn config_defaults_match_the_device_firmware() {
        let config = DeviceConfig::new("aeropac.local", SecretString::from("0000"));
        assert_eq!(config.port, 443);
        assert_eq!(config.username, "admin");
        assert!(config.use_tls);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn fan_level_is_validated_before_any_network_activity() {
        let client = client();

        // Not connected -- an in-range level would fail with a
        // connection error, but validation must win for bad input.
        let err = client.set_fan_level(8).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn requests_require_a_connection() {
        let client = client();
        let err = client.send_request(command::GET_DEVICE, None).await.unwrap_err();
        assert!(err.is_connection(), "got {err:?}");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_without_a_connection() {
        let client = client();
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[test]
    fn request_ids_are_distinct_under_concurrent_allocation() {
        let client = std::sync::Arc::new(client());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = std::sync::Arc::clone(&client);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| client.allocate_id()).collect::<Vec<_>>()
            }));
        }

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 800);
    }
}
