use thiserror::Error;

/// Handshake failures. Every variant is terminal for the connection attempt.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    NoToken,

    #[error("invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    /// Token verified but the user it names is gone.
    #[error("user not found")]
    UserNotFound,

    #[error("authentication timed out")]
    Timeout,

    #[error("authentication unavailable")]
    Store(#[source] anyhow::Error),
}

/// Close code for a refused handshake.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Close code when authentication could not be completed at all.
pub const CLOSE_AUTH_UNAVAILABLE: u16 = 4000;

impl AuthError {
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::NoToken | AuthError::InvalidToken(_) | AuthError::UserNotFound => {
                CLOSE_UNAUTHORIZED
            }
            AuthError::Timeout | AuthError::Store(_) => CLOSE_AUTH_UNAVAILABLE,
        }
    }
}

/// Per-operation failures, reported to the originating connection only.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Covers both "no such chat" and "not a member" so chat existence never leaks.
    #[error("chat not found or access denied")]
    AccessDenied,

    #[error("message must have content or attachments")]
    EmptyMessage,

    #[error("invalid command")]
    InvalidCommand,

    #[error("store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl GatewayError {
    /// Text for the outbound `error` event. Store details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Store(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
