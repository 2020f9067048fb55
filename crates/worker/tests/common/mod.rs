//! In-memory collaborators shared by the worker integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use vitals_core::repository::{AlertRepository, ObservationRepository};
use vitals_core::stream::AlertPublisher;
use vitals_core::{Alert, BoxError, Observation};

/// Shared record of which collaborator was called, in call order.
pub type Journal = Arc<Mutex<Vec<&'static str>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

// ---------------------------------------------------------------------------
// Alert publisher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<Alert>>,
    pub fail: AtomicBool,
    journal: Option<Journal>,
}

impl RecordingPublisher {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.fail.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn published(&self) -> Vec<Alert> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertPublisher for RecordingPublisher {
    async fn publish_alert(&self, alert: &Alert) -> Result<(), BoxError> {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push("publish");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err("broker unavailable".into());
        }
        self.published.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Alert repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingAlertRepo {
    pub saved: Mutex<Vec<Alert>>,
    pub fail: AtomicBool,
    journal: Option<Journal>,
}

impl RecordingAlertRepo {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        let repo = Self::default();
        repo.fail.store(true, Ordering::SeqCst);
        repo
    }

    pub fn saved(&self) -> Vec<Alert> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertRepository for RecordingAlertRepo {
    async fn save(&self, alert: &Alert) -> Result<(), BoxError> {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push("persist");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err("database unavailable".into());
        }
        self.saved.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn list_for_patient(&self, patient_id: &str, limit: i64) -> Result<Vec<Alert>, BoxError> {
        let mut alerts: Vec<Alert> = self
            .saved()
            .into_iter()
            .filter(|a| a.patient_id == patient_id)
            .collect();
        alerts.reverse();
        alerts.truncate(limit.max(0) as usize);
        Ok(alerts)
    }
}

// ---------------------------------------------------------------------------
// Observation repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingObservationRepo {
    pub saved: Mutex<Vec<Observation>>,
    pub fail: AtomicBool,
}

impl RecordingObservationRepo {
    pub fn saved(&self) -> Vec<Observation> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObservationRepository for RecordingObservationRepo {
    async fn save(&self, observation: &Observation) -> Result<(), BoxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("time-series store unavailable".into());
        }
        self.saved.lock().unwrap().push(observation.clone());
        Ok(())
    }

    async fn fetch_range(
        &self,
        patient_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Observation>, BoxError> {
        Ok(self
            .saved()
            .into_iter()
            .filter(|o| o.patient_id == patient_id && o.effective_at >= from && o.effective_at < to)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn observation(patient_id: &str, code: &str, value: f64) -> Observation {
    Observation {
        id: format!("obs-{patient_id}-{code}-{value}"),
        resource_type: "Observation".to_string(),
        status: "final".to_string(),
        patient_id: patient_id.to_string(),
        code: code.to_string(),
        value,
        unit: "bpm".to_string(),
        effective_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap(),
    }
}

pub fn alert(id: &str) -> Alert {
    Alert {
        id: id.to_string(),
        patient_id: "p-1".to_string(),
        observation_id: "obs-1".to_string(),
        alert_type: "HighHeartRate".to_string(),
        message: "HighHeartRate: heart-rate value=101.00 bpm".to_string(),
        timestamp: Utc::now(),
        acknowledged: false,
    }
}

/// Wire-format JSON for an observation message.
pub fn observation_json(id: &str, patient_id: &str, code: &str, value: f64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": id,
        "resourceType": "Observation",
        "status": "final",
        "code": {"text": code},
        "subject": {"reference": format!("Patient/{patient_id}")},
        "effectiveDateTime": "2024-03-01T10:15:00Z",
        "valueQuantity": {"value": value, "unit": "bpm"}
    }))
    .unwrap()
}
