use thiserror::Error;

/// Top-level error type for the `aerolink-api` crate.
///
/// Covers every failure mode of the device session: connection setup,
/// request correlation, wire protocol decoding, caller-side validation,
/// and authentication.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Channel could not be opened, is not open, or was closed underneath
    /// a pending request.
    #[error("connection error: {message}")]
    Connect { message: String },

    /// No correlated response arrived within the request timeout.
    /// The waiter is removed; a late reply for this id is dropped.
    #[error("request {id} timed out after {timeout_secs}s")]
    Timeout { id: u64, timeout_secs: u64 },

    // ── Protocol ────────────────────────────────────────────────────
    /// Malformed inbound frame. Logged and dropped by the read loop;
    /// never tears down the session.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Two in-flight requests would share a correlation id. Ids are
    /// allocated monotonically so this is checked defensively only.
    #[error("request id {id} is already pending")]
    DuplicateRequestId { id: u64 },

    // ── Caller input ────────────────────────────────────────────────
    /// Caller-supplied parameter outside the device's accepted range.
    /// Raised before any frame is sent.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    // ── Authentication ──────────────────────────────────────────────
    /// The device rejected the login credentials.
    #[error("authentication rejected: {message}")]
    Authentication { message: String },
}

impl Error {
    pub(crate) fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Returns `true` if this error means the channel is gone and the
    /// session must be reconnected before retrying.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }

    /// Returns `true` if the request simply went unanswered -- the
    /// session itself may still be healthy.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
