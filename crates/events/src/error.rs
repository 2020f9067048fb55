use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connecting to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Every producer of an in-memory topic has been dropped.
    #[error("Stream {0} is closed")]
    Closed(String),
}
