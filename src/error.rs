use thiserror::Error;

/// Crate-level error taxonomy.
///
/// Frame-level corruption never surfaces here — malformed frames are logged
/// and skipped inside the decoder. Everything that does surface ends in an
/// observable, recoverable state: `ConnectionLost` offers retry/recover,
/// `Recovery` keeps prior partial content visible.
#[derive(Debug, Error)]
pub enum RestreamError {
    /// The submitted prompt was empty after trimming. No state change occurs.
    #[error("prompt must not be empty")]
    EmptyPrompt,

    /// Network-level failure on the streaming transport or a probe.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote server replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The server sent an explicit `error` frame mid-stream.
    #[error("server error: {message}")]
    Server { message: String },

    /// Every reconnect attempt was consumed without re-establishing a stream.
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },

    /// The out-of-band recovery fetch itself failed. Prior partial content
    /// is preserved and a further recovery attempt remains available.
    #[error("recovery failed: {detail}")]
    Recovery { detail: String },

    /// `recover_full_response` was called with no failed exchange to recover.
    #[error("no failed exchange to recover")]
    NothingToRecover,

    /// A configuration value or file could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RestreamError {
    /// Short stable label for logs and the UI error banner.
    pub fn kind(&self) -> &'static str {
        match self {
            RestreamError::EmptyPrompt => "validation",
            RestreamError::Transport(_) => "transport",
            RestreamError::Http { .. } => "http",
            RestreamError::Server { .. } => "server",
            RestreamError::ConnectionLost { .. } => "connection_lost",
            RestreamError::Recovery { .. } => "recovery",
            RestreamError::NothingToRecover => "nothing_to_recover",
            RestreamError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prompt_display() {
        assert_eq!(RestreamError::EmptyPrompt.to_string(), "prompt must not be empty");
    }

    #[test]
    fn test_http_display_carries_status_and_url() {
        let err = RestreamError::Http { status: 503, url: "http://localhost:8080/stream-start".to_string() };
        let s = err.to_string();
        assert!(s.contains("503"), "status in display: {s}");
        assert!(s.contains("/stream-start"), "url in display: {s}");
    }

    #[test]
    fn test_connection_lost_display() {
        let err = RestreamError::ConnectionLost { attempts: 3 };
        assert_eq!(err.to_string(), "connection lost after 3 reconnect attempts");
    }

    #[test]
    fn test_server_error_display() {
        let err = RestreamError::Server { message: "model overloaded".to_string() };
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(RestreamError::EmptyPrompt.kind(), "validation");
        assert_eq!(RestreamError::ConnectionLost { attempts: 1 }.kind(), "connection_lost");
        assert_eq!(RestreamError::Recovery { detail: "x".into() }.kind(), "recovery");
        assert_eq!(RestreamError::NothingToRecover.kind(), "nothing_to_recover");
    }

    #[test]
    fn test_is_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&RestreamError::EmptyPrompt);
    }
}
