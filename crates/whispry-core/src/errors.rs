/// Core error type for the chat client.
///
/// Adapter crates map their transport-specific errors into this type so the
/// sync engine can degrade consistently (log + notice) instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// True for failures caused by a missing or rejected bearer credential.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Auth(_) => true,
            Error::Http { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_detection_covers_http_status() {
        assert!(Error::Auth("expired".to_string()).is_auth());
        assert!(Error::Http {
            status: 401,
            body: String::new()
        }
        .is_auth());
        assert!(!Error::Http {
            status: 500,
            body: String::new()
        }
        .is_auth());
        assert!(!Error::Transport("closed".to_string()).is_auth());
    }
}
