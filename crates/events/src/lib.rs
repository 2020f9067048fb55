//! Stream transport adapters for the vitals pipeline.
//!
//! - [`RedisStreamSource`] / [`RedisPublisher`]: Redis Streams with consumer
//!   groups, the production transport.
//! - [`MemoryBroker`]: in-process topics for local runs and tests, backed by
//!   tokio channels.

pub mod error;
pub mod memory;
pub mod redis_stream;

pub use error::StreamError;
pub use memory::{MemoryBroker, MemorySource};
pub use redis_stream::{
    RedisPublisher, RedisStreamConfig, RedisStreamSource, DEFAULT_BATCH_SIZE, DEFAULT_CLAIM_IDLE,
};
