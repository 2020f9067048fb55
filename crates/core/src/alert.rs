//! Alert record and the factory that builds it from a processed observation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codes::{ALERT_TYPE_ANOMALY, LABEL_SEPARATOR};
use crate::observation::Observation;
use crate::types::Timestamp;

/// A notification that an observation crossed a threshold or was anomalous.
///
/// Serializes to the alert-topic wire format
/// `{id, patientID, observationID, type, message, timestamp, acknowledged}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "patientID")]
    pub patient_id: String,
    /// Id of the observation that raised this alert.
    #[serde(rename = "observationID")]
    pub observation_id: String,
    /// Triggered rule labels joined by `,`, or `"Anomaly"`.
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    /// When the alert was generated (not when the reading was taken).
    pub timestamp: Timestamp,
    /// Set only by the external acknowledgement path.
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    /// Individual labels contained in [`Alert::alert_type`].
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.alert_type.split(LABEL_SEPARATOR)
    }

    pub fn is_anomaly(&self) -> bool {
        self.alert_type == ALERT_TYPE_ANOMALY
    }
}

/// Builds [`Alert`]s with fresh identifiers.
///
/// Ids are UUIDv7: time-ordered for storage locality, with random bits so
/// rapid successive calls (or several workers) never collide.
pub struct AlertFactory;

impl AlertFactory {
    /// Alert for threshold rules; `None` when no label was triggered.
    pub fn for_rules(observation: &Observation, labels: &[&str]) -> Option<Alert> {
        if labels.is_empty() {
            return None;
        }
        let alert_type = labels.join(&LABEL_SEPARATOR.to_string());
        let message = format!(
            "{alert_type}: {} value={:.2}{} at {}",
            observation.code,
            observation.value,
            unit_suffix(&observation.unit),
            observation.effective_at.to_rfc3339(),
        );
        Some(Self::build(observation, alert_type, message))
    }

    /// Alert for a statistical outlier; `None` when `anomalous` is false.
    pub fn for_anomaly(observation: &Observation, anomalous: bool) -> Option<Alert> {
        if !anomalous {
            return None;
        }
        let message = format!(
            "Anomaly detected: {} value={:.2}{} at {}",
            observation.code,
            observation.value,
            unit_suffix(&observation.unit),
            observation.effective_at.to_rfc3339(),
        );
        Some(Self::build(
            observation,
            ALERT_TYPE_ANOMALY.to_string(),
            message,
        ))
    }

    fn build(observation: &Observation, alert_type: String, message: String) -> Alert {
        Alert {
            id: next_alert_id(),
            patient_id: observation.patient_id.clone(),
            observation_id: observation.id.clone(),
            alert_type,
            message,
            timestamp: Utc::now(),
            acknowledged: false,
        }
    }
}

pub fn next_alert_id() -> String {
    Uuid::now_v7().to_string()
}

fn unit_suffix(unit: &str) -> String {
    if unit.is_empty() {
        String::new()
    } else {
        format!(" {unit}")
    }
}
