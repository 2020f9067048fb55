//! Stream consumer loop.
//!
//! Reads one message at a time, decodes it, hands it to the shared
//! [`ObservationProcessor`] and acknowledges it before reading the next.
//! Every message is acknowledged once its step finishes, including
//! undecodable ones, so a poison message is never redelivered forever.
//! Messages delivered but not yet acknowledged when the process dies are
//! redelivered by the transport (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vitals_core::stream::{MessageSource, StreamMessage};
use vitals_core::decode_observation;

use crate::processor::ObservationProcessor;

/// Default pause after a failed read.
pub const DEFAULT_READ_BACKOFF: Duration = Duration::from_secs(1);

/// Per-worker counters, returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub alerts: u64,
    pub decode_failures: u64,
    pub process_failures: u64,
    pub read_errors: u64,
}

pub struct Consumer {
    name: String,
    source: Box<dyn MessageSource>,
    processor: Arc<ObservationProcessor>,
    backoff: Duration,
    stats: ConsumerStats,
}

impl Consumer {
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn MessageSource>,
        processor: Arc<ObservationProcessor>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            processor,
            backoff: DEFAULT_READ_BACKOFF,
            stats: ConsumerStats::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until `cancel` fires.
    ///
    /// Cancellation is checked before each read and interrupts a read that is
    /// blocked waiting for data. Processing of a message that was already
    /// read always runs to completion.
    pub async fn run(mut self, cancel: CancellationToken) -> ConsumerStats {
        tracing::info!(consumer = %self.name, "Consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = self.source.next_message() => read,
            };

            match read {
                Ok(Some(message)) => self.handle(message).await,
                Ok(None) => {}
                Err(e) => {
                    self.stats.read_errors += 1;
                    tracing::warn!(
                        consumer = %self.name,
                        error = %e,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Stream read failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }

        tracing::info!(
            consumer = %self.name,
            processed = self.stats.processed,
            alerts = self.stats.alerts,
            decode_failures = self.stats.decode_failures,
            "Consumer stopped"
        );
        self.stats
    }

    async fn handle(&mut self, message: StreamMessage) {
        match decode_observation(&message.payload) {
            Ok(observation) => {
                tracing::debug!(
                    consumer = %self.name,
                    entry_id = %message.id,
                    observation_id = %observation.id,
                    patient_id = %observation.patient_id,
                    code = %observation.code,
                    value = observation.value,
                    "Processing observation"
                );
                let outcome = self.processor.handle(&observation).await;
                self.stats.processed += 1;
                self.stats.alerts += outcome.alerts.len() as u64;
                if !outcome.is_ok() {
                    self.stats.process_failures += 1;
                }
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::warn!(
                    consumer = %self.name,
                    entry_id = %message.id,
                    validation = e.is_validation(),
                    error = %e,
                    "Discarding undecodable message"
                );
            }
        }

        if let Err(e) = self.source.acknowledge(&message).await {
            tracing::error!(
                consumer = %self.name,
                entry_id = %message.id,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }
}
