use std::time::Duration;

/// Typed error hierarchy for one confidential exchange.
/// Handshake and transport failures abort the exchange; frame failures abort
/// only the remaining stream; persistence failures never corrupt history.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ExchangeError {
    // Handshake
    #[error("key fetch failed: {0}")]
    KeyFetch(String),
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    // Channel — Encrypt should not occur under correct usage.
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("stream corrupted: {0}")]
    StreamCorruption(String),

    // Transport
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Local
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("an exchange is already streaming on this session")]
    SessionBusy,
    #[error("empty prompt")]
    EmptyPrompt,
    #[error("cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// True for failures that occur before any response frame can arrive.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(self, Self::KeyFetch(_) | Self::KeyAgreement(_))
    }

    /// True for untrusted-data rejections. Never retried automatically.
    pub fn is_frame_failure(&self) -> bool {
        matches!(self, Self::Decrypt | Self::StreamCorruption(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::KeyFetch(_) => "key_fetch",
            Self::KeyAgreement(_) => "key_agreement",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::StreamCorruption(_) => "stream_corruption",
            Self::Network(_) => "network",
            Self::Server { .. } => "server",
            Self::Timeout(_) => "timeout",
            Self::Persistence(_) => "persistence",
            Self::SessionBusy => "session_busy",
            Self::EmptyPrompt => "empty_prompt",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code from the service.
    pub fn from_status(status: u16, body: String) -> Self {
        Self::Server { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_classification() {
        assert!(ExchangeError::KeyFetch("unreachable".into()).is_handshake_failure());
        assert!(ExchangeError::KeyAgreement("bad point".into()).is_handshake_failure());
        assert!(!ExchangeError::Decrypt.is_handshake_failure());
    }

    #[test]
    fn frame_classification() {
        assert!(ExchangeError::Decrypt.is_frame_failure());
        assert!(ExchangeError::StreamCorruption("bad hex".into()).is_frame_failure());
        assert!(!ExchangeError::Network("tcp".into()).is_frame_failure());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ExchangeError::SessionBusy.error_kind(), "session_busy");
        assert_eq!(ExchangeError::Cancelled.error_kind(), "cancelled");
        assert_eq!(
            ExchangeError::Timeout(Duration::from_secs(10)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn from_status_keeps_body() {
        let err = ExchangeError::from_status(503, "unavailable".into());
        assert!(matches!(err, ExchangeError::Server { status: 503, .. }));
    }
}
