//! Storage seams for alerts (relational) and observations (time series).

use async_trait::async_trait;

use crate::alert::Alert;
use crate::error::BoxError;
use crate::observation::Observation;
use crate::types::Timestamp;

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn save(&self, alert: &Alert) -> Result<(), BoxError>;

    /// Alerts for one patient, newest first.
    async fn list_for_patient(&self, patient_id: &str, limit: i64)
        -> Result<Vec<Alert>, BoxError>;
}

#[async_trait]
pub trait ObservationRepository: Send + Sync {
    async fn save(&self, observation: &Observation) -> Result<(), BoxError>;

    /// Observations for one patient with `from <= effective_at < to`,
    /// oldest first.
    async fn fetch_range(
        &self,
        patient_id: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Observation>, BoxError>;
}
