use thiserror::Error;

/// Error types for the session relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Protocol errors
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },

    #[error("Admission to session {session_id} denied: {reason}")]
    AdmissionDenied { session_id: String, reason: String },

    /// Client transport errors
    #[error("Not connected to relay")]
    NotConnected,

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Convenience type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    pub fn invalid_payload(event: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::InvalidPayload {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Wire-level error code carried by the `error` event
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidPayload { .. } => "INVALID_PAYLOAD",
            RelayError::AdmissionDenied { .. } => "ADMISSION_DENIED",
            RelayError::NotConnected
            | RelayError::ConnectTimeout(_)
            | RelayError::Transport(_)
            | RelayError::ConnectionClosed(_) => "TRANSPORT_ERROR",
            RelayError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
        }
    }
}
