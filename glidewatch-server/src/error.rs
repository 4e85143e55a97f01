//! Error types for the server package.

use std::time::Duration;

use glidewatch_core::ConfigError;
use tokio_tungstenite::tungstenite;

/// Startup and wiring failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Outbound OneBot delivery failures. Never propagated past the notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Connection closed before a reply")]
    Closed,
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl NotifyError {
    /// Failures that usually mean no OneBot endpoint is running. Logged at
    /// debug instead of warn.
    pub fn is_quiet(&self) -> bool {
        match self {
            NotifyError::ConnectionRefused(_) | NotifyError::Timeout(_) => true,
            NotifyError::WebSocket(text) => {
                let text = text.to_ascii_lowercase();
                text.contains("connection refused")
                    || text.contains("timeout")
                    || text.contains("timed out")
            }
            _ => false,
        }
    }
}

impl From<tungstenite::Error> for NotifyError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                NotifyError::ConnectionRefused(io.to_string())
            }
            tungstenite::Error::Url(url) => NotifyError::InvalidEndpoint(url.to_string()),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                NotifyError::Closed
            }
            other => NotifyError::WebSocket(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_classification() {
        assert!(NotifyError::ConnectionRefused("os error 111".into()).is_quiet());
        assert!(NotifyError::Timeout(Duration::from_secs(10)).is_quiet());
        assert!(NotifyError::WebSocket("IO error: Connection timed out".into()).is_quiet());
        assert!(!NotifyError::Rejected("group not found".into()).is_quiet());
        assert!(!NotifyError::Closed.is_quiet());
    }

    #[test]
    fn test_refused_io_maps_to_connection_refused() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: NotifyError = tungstenite::Error::Io(io).into();
        assert!(matches!(err, NotifyError::ConnectionRefused(_)));
        assert!(err.is_quiet());
    }
}
