//! Row model for the `alerts` table.

use sqlx::FromRow;
use vitals_core::types::Timestamp;
use vitals_core::Alert;

/// A row from the `alerts` table.
#[derive(Debug, Clone, FromRow)]
pub struct AlertRow {
    pub id: String,
    pub patient_id: String,
    pub observation_id: String,
    pub message: String,
    #[sqlx(rename = "type")]
    pub alert_type: String,
    pub timestamp: Timestamp,
    pub acknowledged: bool,
}

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        Alert {
            id: row.id,
            patient_id: row.patient_id,
            observation_id: row.observation_id,
            alert_type: row.alert_type,
            message: row.message,
            timestamp: row.timestamp,
            acknowledged: row.acknowledged,
        }
    }
}
