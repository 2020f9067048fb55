//! One processing step: evaluate, detect, deliver alerts, record metrics.

use std::sync::Arc;

use vitals_core::thresholds::evaluate;
use vitals_core::{Alert, AlertFactory, AnomalyDetector, BoxError, Observation, Thresholds};

use crate::sink::{AlertSink, MetricsSink, SinkError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Alert {alert_id} delivery failed: {source}")]
    Alert {
        alert_id: String,
        #[source]
        source: SinkError,
    },

    #[error("Failed to store observation: {0}")]
    Metrics(#[source] BoxError),
}

/// Result of processing one observation.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Every alert raised, whether or not delivery succeeded.
    pub alerts: Vec<Alert>,
    pub errors: Vec<ProcessError>,
}

impl ProcessOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Shared by all consumer workers. The detector is the only mutable state
/// and serializes its own updates.
pub struct ObservationProcessor {
    thresholds: Thresholds,
    detector: AnomalyDetector,
    alerts: AlertSink,
    metrics: MetricsSink,
}

impl ObservationProcessor {
    pub fn new(
        thresholds: Thresholds,
        detector: AnomalyDetector,
        alerts: AlertSink,
        metrics: MetricsSink,
    ) -> Self {
        Self {
            thresholds,
            detector,
            alerts,
            metrics,
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Process one decoded observation.
    ///
    /// Threshold and anomaly alerts are built first, then delivered in that
    /// order, then the observation is stored. A failed delivery does not
    /// stop the remaining steps; every failure is collected in the outcome.
    pub async fn handle(&self, observation: &Observation) -> ProcessOutcome {
        let labels = evaluate(observation, &self.thresholds);
        let anomalous = self
            .detector
            .add(&observation.patient_id, &observation.code, observation.value);

        let alerts: Vec<Alert> = AlertFactory::for_rules(observation, &labels)
            .into_iter()
            .chain(AlertFactory::for_anomaly(observation, anomalous))
            .collect();

        let mut outcome = ProcessOutcome::default();

        for alert in &alerts {
            match self.alerts.deliver(alert).await {
                Ok(()) => {
                    tracing::info!(
                        alert_id = %alert.id,
                        patient_id = %alert.patient_id,
                        observation_id = %alert.observation_id,
                        alert_type = %alert.alert_type,
                        "Alert raised"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        alert_id = %alert.id,
                        patient_id = %alert.patient_id,
                        dropped = e.is_dropped(),
                        error = %e,
                        "Alert delivery failed"
                    );
                    outcome.errors.push(ProcessError::Alert {
                        alert_id: alert.id.clone(),
                        source: e,
                    });
                }
            }
        }

        if let Err(e) = self.metrics.record(observation).await {
            tracing::error!(
                observation_id = %observation.id,
                patient_id = %observation.patient_id,
                error = %e,
                "Failed to store observation"
            );
            outcome.errors.push(ProcessError::Metrics(e));
        }

        outcome.alerts = alerts;
        outcome
    }
}
