//! Transport seams between the processing pipeline and the message broker.

use async_trait::async_trait;

use crate::alert::Alert;
use crate::error::BoxError;
use crate::observation::Observation;

/// One raw message read from the observation topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Broker-assigned id used for acknowledgement.
    pub id: String,
    /// Partition key, usually the patient id.
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Consumer-group reader. Each worker owns its own source.
#[async_trait]
pub trait MessageSource: Send {
    /// Block until the next message is available.
    ///
    /// `Ok(None)` means the read timed out or the source is closed; callers
    /// simply poll again (or stop when shutting down).
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, BoxError>;

    /// Mark a message as processed so it is not redelivered to the group.
    async fn acknowledge(&mut self, message: &StreamMessage) -> Result<(), BoxError>;
}

/// Producer for the alert topic.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish_alert(&self, alert: &Alert) -> Result<(), BoxError>;
}

/// Producer for the observation topic (simulators and replay tooling).
#[async_trait]
pub trait ObservationPublisher: Send + Sync {
    async fn publish_observation(&self, observation: &Observation) -> Result<(), BoxError>;
}
