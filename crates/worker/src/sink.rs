//! Alert and metrics sinks.
//!
//! [`AlertSink`] sends each alert to two places, the alert stream (live
//! subscribers) and the alert repository (later queries), in the configured
//! [`DeliveryOrder`]. If the first step fails the second is never attempted.
//! If the second step fails the alert exists in exactly one place, and the
//! returned [`SinkError`] variant says which.
//!
//! [`MetricsSink`] persists every processed observation to the time-series
//! store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use vitals_core::repository::{AlertRepository, ObservationRepository};
use vitals_core::stream::AlertPublisher;
use vitals_core::{Alert, BoxError, Observation};

/// Order of the two alert delivery steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryOrder {
    /// Publish, then persist. A persist failure leaves a live alert that
    /// later queries cannot find.
    PublishFirst,
    /// Persist, then publish. A publish failure leaves a stored alert that
    /// no live subscriber saw.
    #[default]
    PersistFirst,
}

impl FromStr for DeliveryOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "publish_first" => Ok(Self::PublishFirst),
            "persist_first" => Ok(Self::PersistFirst),
            other => Err(format!(
                "unknown delivery order `{other}` (expected publish_first or persist_first)"
            )),
        }
    }
}

impl fmt::Display for DeliveryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublishFirst => write!(f, "publish_first"),
            Self::PersistFirst => write!(f, "persist_first"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Publishing was the first step and failed; nothing was stored.
    #[error("Failed to publish alert: {0}")]
    PublishFailed(#[source] BoxError),

    /// Persisting was the first step and failed; nothing was published.
    #[error("Failed to persist alert: {0}")]
    PersistFailed(#[source] BoxError),

    /// Stored, but live subscribers never received it.
    #[error("Alert stored but not published: {0}")]
    StoredNotPublished(#[source] BoxError),

    /// Live subscribers received it, but it is missing from storage.
    #[error("Alert published but not stored: {0}")]
    PublishedNotStored(#[source] BoxError),
}

impl SinkError {
    /// `true` when the alert reached neither destination.
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::PublishFailed(_) | Self::PersistFailed(_))
    }
}

// ---------------------------------------------------------------------------
// AlertSink
// ---------------------------------------------------------------------------

pub struct AlertSink {
    publisher: Arc<dyn AlertPublisher>,
    repository: Arc<dyn AlertRepository>,
    order: DeliveryOrder,
}

impl AlertSink {
    pub fn new(
        publisher: Arc<dyn AlertPublisher>,
        repository: Arc<dyn AlertRepository>,
        order: DeliveryOrder,
    ) -> Self {
        Self {
            publisher,
            repository,
            order,
        }
    }

    pub fn order(&self) -> DeliveryOrder {
        self.order
    }

    /// Deliver one alert to the stream and the repository.
    pub async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        match self.order {
            DeliveryOrder::PublishFirst => {
                self.publisher
                    .publish_alert(alert)
                    .await
                    .map_err(SinkError::PublishFailed)?;
                self.repository
                    .save(alert)
                    .await
                    .map_err(SinkError::PublishedNotStored)?;
            }
            DeliveryOrder::PersistFirst => {
                self.repository
                    .save(alert)
                    .await
                    .map_err(SinkError::PersistFailed)?;
                self.publisher
                    .publish_alert(alert)
                    .await
                    .map_err(SinkError::StoredNotPublished)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MetricsSink
// ---------------------------------------------------------------------------

pub struct MetricsSink {
    repository: Arc<dyn ObservationRepository>,
}

impl MetricsSink {
    pub fn new(repository: Arc<dyn ObservationRepository>) -> Self {
        Self { repository }
    }

    /// Persist one observation. Not retried.
    pub async fn record(&self, observation: &Observation) -> Result<(), BoxError> {
        self.repository.save(observation).await
    }
}
