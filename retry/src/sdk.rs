//! Structured errors raised by the engine transport
//!
//! Most engine failures arrive as plain text. The few shapes the transport
//! can recognise on its own are modelled here so the classifier can match
//! them by type instead of by message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    /// The SSO endpoint rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The engine answered 404 for the requested object.
    #[error("{0}")]
    NotFound(String),

    /// The TCP connection to the engine could not be established or broke.
    #[error("connection to engine failed: {0}")]
    Connection(String),

    /// Any other non-success HTTP status.
    #[error("{status} {reason}")]
    Http { status: u16, reason: String },
}

impl SdkError {
    /// 4xx statuses that will fail the same way if sent again.
    ///
    /// 408, 409 and 429 are excluded: a timeout, conflict or rate limit can
    /// clear up on its own.
    pub fn is_permanent_http_failure(&self) -> bool {
        match self {
            SdkError::Http { status, .. } => {
                (400..500).contains(status) && !matches!(status, 408 | 409 | 429)
            }
            _ => false,
        }
    }
}
