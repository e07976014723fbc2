//! Bot API surface consumed by field extractors.
//!
//! Bot lifecycle and transport management live outside the engine; this
//! module defines the narrow interface the engine calls back into, e.g. for
//! an "is the sender a group admin" probe during condition evaluation.

use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error type for API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,

    /// The API call timed out.
    #[error("API call timed out")]
    Timeout,

    /// The API returned an error.
    #[error("API error ({retcode}): {message}")]
    Failed {
        /// Platform-specific return code.
        retcode: i32,
        /// Human-readable description.
        message: String,
    },

    /// Failed to serialize or deserialize call data.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The API surface of one connected bot account.
///
/// Adapters implement this for their platform; the engine only ever issues
/// generic action calls and interprets the JSON result.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// The bot account identifier.
    fn id(&self) -> &str;

    /// Invokes a platform action with JSON parameters.
    async fn call_api(&self, action: &str, params: Json) -> ApiResult<Json>;
}
