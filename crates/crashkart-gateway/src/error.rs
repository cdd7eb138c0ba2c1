use rust_decimal::Decimal;
use thiserror::Error;

/// Errors returned by the payment gateway client and signature checks.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-2xx status.
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Key id or key secret is not configured.
    #[error("payment gateway credentials are not configured")]
    MissingCredentials,

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// The amount cannot be expressed in minor units.
    #[error("amount {0} cannot be sent to the gateway")]
    InvalidAmount(Decimal),

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}
