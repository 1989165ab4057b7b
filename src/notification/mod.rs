pub mod fanout;
pub mod push;
pub mod recipients;

use thiserror::Error;

/// Failure while delivering an already-stored notification.
///
/// Delivery is best effort: these are logged at the call site and never
/// turned into an HTTP response.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("push gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push gateway returned {status}: {body}")]
    Gateway { status: u16, body: String },

    #[error("event payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("push token lookup failed: {0}")]
    Tokens(String),
}
