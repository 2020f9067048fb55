//! Repository for the `alerts` table.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE alerts (
//!     id             TEXT PRIMARY KEY,
//!     patient_id     TEXT NOT NULL,
//!     observation_id TEXT NOT NULL,
//!     message        TEXT NOT NULL,
//!     type           TEXT NOT NULL,
//!     timestamp      TIMESTAMPTZ NOT NULL,
//!     acknowledged   BOOLEAN NOT NULL DEFAULT FALSE
//! );
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use vitals_core::repository::AlertRepository;
use vitals_core::{Alert, BoxError};

use crate::models::AlertRow;

/// Column list for `alerts` queries.
const COLUMNS: &str = "id, patient_id, observation_id, message, type, timestamp, acknowledged";

/// Provides query operations for alerts.
pub struct AlertRepo;

impl AlertRepo {
    /// Insert one alert. Alert ids are unique, so a duplicate is an error.
    pub async fn insert(pool: &PgPool, alert: &Alert) -> Result<(), sqlx::Error> {
        let query = format!(
            "INSERT INTO alerts ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        sqlx::query(&query)
            .bind(&alert.id)
            .bind(&alert.patient_id)
            .bind(&alert.observation_id)
            .bind(&alert.message)
            .bind(&alert.alert_type)
            .bind(alert.timestamp)
            .bind(alert.acknowledged)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Alerts for a patient, newest first.
    pub async fn list_for_patient(
        pool: &PgPool,
        patient_id: &str,
        limit: i64,
    ) -> Result<Vec<AlertRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM alerts \
             WHERE patient_id = $1 \
             ORDER BY timestamp DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, AlertRow>(&query)
            .bind(patient_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}

/// [`AlertRepository`] backed by a Postgres pool.
#[derive(Clone)]
pub struct PgAlertRepository {
    pool: PgPool,
}

impl PgAlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertRepository for PgAlertRepository {
    async fn save(&self, alert: &Alert) -> Result<(), BoxError> {
        AlertRepo::insert(&self.pool, alert).await?;
        tracing::debug!(alert_id = %alert.id, patient_id = %alert.patient_id, "Alert stored");
        Ok(())
    }

    async fn list_for_patient(&self, patient_id: &str, limit: i64) -> Result<Vec<Alert>, BoxError> {
        let rows = AlertRepo::list_for_patient(&self.pool, patient_id, limit).await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }
}
