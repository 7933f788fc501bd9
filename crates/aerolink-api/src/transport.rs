//! WebSocket transport to the device.
//!
//! One duplex text-frame channel per connection. Device firmware ships
//! self-signed certificates, so the secure path uses a rustls config
//! with certificate-chain and hostname verification disabled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls::DigitallySignedStruct;
use rustls::SignatureScheme;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<WsStream, Message>;
type Reader = SplitStream<WsStream>;

/// Outbound half of the channel plus liveness tracking.
///
/// The sink is behind an async mutex so concurrent senders cannot
/// interleave frame writes; one send completes before the next begins.
pub(crate) struct Transport {
    write: Mutex<Writer>,
    open: Arc<AtomicBool>,
}

impl Transport {
    /// Open the channel to `host:port` and hand back the outbound half
    /// and the inbound frame reader.
    ///
    /// Fails with [`Error::Connect`] on network failure or when the
    /// handshake does not complete within `connect_timeout`.
    pub async fn open(
        host: &str,
        port: u16,
        secure: bool,
        connect_timeout: Duration,
    ) -> Result<(Self, FrameReader), Error> {
        let url = endpoint_url(host, port, secure);
        debug!(url, "opening device channel");

        let connector = if secure {
            Some(accept_any_cert_connector()?)
        } else {
            None
        };

        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            url.as_str(),
            None,
            false,
            connector,
        );
        let (stream, _response) = tokio::time::timeout(connect_timeout, handshake)
            .await
            .map_err(|_| {
                Error::connect(format!(
                    "handshake with {host}:{port} timed out after {}s",
                    connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::connect(format!("cannot connect to {host}:{port}: {e}")))?;

        info!(host, port, secure, "device channel open");

        let (write, read) = stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let transport = Self {
            write: Mutex::new(write),
            open: Arc::clone(&open),
        };
        Ok((transport, FrameReader { read, open }))
    }

    /// `true` while the channel has neither been closed locally nor
    /// ended by the remote.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Write one text frame.
    pub async fn send(&self, text: String) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::connect("channel is not open"));
        }
        trace!(frame = %text, "sending frame");

        let mut write = self.write.lock().await;
        write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::connect(format!("send failed: {e}")))
    }

    /// Close the channel. Idempotent; errors from an already-closed
    /// socket are ignored.
    pub async fn close(&self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        let mut write = self.write.lock().await;
        let _ = write.close().await;
        if was_open {
            debug!("device channel closed");
        }
    }
}

/// Inbound half of the channel: a sequence of text frames that ends when
/// the remote closes or the socket errors.
pub(crate) struct FrameReader {
    read: Reader,
    open: Arc<AtomicBool>,
}

impl FrameReader {
    /// Next inbound text frame, or `None` once the channel is done.
    ///
    /// Control frames are skipped (tungstenite answers pings itself);
    /// close frames and socket errors terminate the sequence and mark
    /// the transport as no longer open.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(frame = %text, "received frame");
                    return Some(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "remote closed the channel");
                    break;
                }
                Some(Ok(other)) => {
                    trace!(kind = ?other, "skipping non-text frame");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "socket error, ending frame stream");
                    break;
                }
                None => break,
            }
        }
        self.open.store(false, Ordering::SeqCst);
        None
    }
}

// ── TLS ──────────────────────────────────────────────────────────────

/// TLS connector that accepts any certificate the device presents.
///
/// The crypto provider is pinned to `ring` so the config builds the same
/// way regardless of which providers other dependencies enable.
fn accept_any_cert_connector() -> Result<Connector, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::connect(format!("tls configuration rejected: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}

/// Verifier that accepts self-signed, expired, and wrongly-named
/// certificates alike. The device firmware does not carry CA-signed
/// certificates, so there is nothing meaningful to verify against.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// WebSocket endpoint for a device. The path is fixed by the firmware.
fn endpoint_url(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{host}:{port}/WebSocket")
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn endpoint_url_schemes() {
        assert_eq!(endpoint_url("192.168.1.40", 443, true), "wss://192.168.1.40:443/WebSocket");
        assert_eq!(endpoint_url("aeropac.local", 80, false), "ws://aeropac.local:80/WebSocket");
    }

    #[tokio::test]
    async fn open_fails_against_unreachable_host() {
        // Port 1 on localhost refuses immediately.
        let result = Transport::open("127.0.0.1", 1, false, Duration::from_secs(2)).await;
        let err = result.err().expect("connect should fail");
        assert!(err.is_connection(), "expected connection error, got {err:?}");
    }
}
