//! InfluxDB 1.x observation store over the HTTP API.
//!
//! Each observation becomes one point in the `vitals` measurement:
//!
//! ```text
//! vitals,code=heart-rate,patientID=p-1,unit=bpm observation_id="obs-1",value=101 1709288100000
//! ```
//!
//! Writes go to `/write` with millisecond precision, so readings a fraction
//! of a second apart stay distinct points. Range reads go to `/query`
//! as InfluxQL and the JSON result is mapped back by column name.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use vitals_core::observation::{DEFAULT_STATUS, RESOURCE_TYPE_OBSERVATION};
use vitals_core::repository::ObservationRepository;
use vitals_core::types::Timestamp;
use vitals_core::{BoxError, Observation};

/// Measurement that holds every vital-sign point.
pub const MEASUREMENT: &str = "vitals";

/// Tag carrying the patient id.
pub const TAG_PATIENT: &str = "patientID";

/// Timestamp precision of written points.
const WRITE_PRECISION: &str = "ms";

/// HTTP request timeout for a single write or query.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum InfluxError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("InfluxDB request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("InfluxDB returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The query ran but InfluxDB reported an error in the result body.
    #[error("InfluxDB query error: {0}")]
    Query(String),

    #[error("InfluxDB configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connection settings for [`InfluxClient`].
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://localhost:8086`.
    pub addr: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct InfluxClient {
    client: reqwest::Client,
    config: InfluxConfig,
}

impl InfluxClient {
    pub fn new(config: InfluxConfig) -> Result<Self, InfluxError> {
        if config.addr.trim().is_empty() || config.database.trim().is_empty() {
            return Err(InfluxError::Config(
                "address and database must be provided".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.addr.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) if !user.is_empty() => {
                request.basic_auth(user, self.config.password.as_deref())
            }
            _ => request,
        }
    }

    /// Write one observation as a point in [`MEASUREMENT`].
    pub async fn write(&self, observation: &Observation) -> Result<(), InfluxError> {
        let line = encode_line(observation);
        let request = self
            .client
            .post(self.endpoint("write"))
            .query(&[("db", self.config.database.as_str()), ("precision", WRITE_PRECISION)])
            .body(line);
        let response = self.authorize(request).send().await?;
        check_status(response).await?;
        Ok(())
    }

    /// Observations for `patient_id` with `from <= time < to`, oldest first.
    pub async fn query_range(
        &self,
        patient_id: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Observation>, InfluxError> {
        let q = build_range_query(patient_id, from, to);
        tracing::debug!(query = %q, "Running InfluxQL query");

        let request = self
            .client
            .get(self.endpoint("query"))
            .query(&[("db", self.config.database.as_str()), ("q", q.as_str())]);
        let response = self.authorize(request).send().await?;
        let response = check_status(response).await?;
        let body: QueryResponse = response.json().await?;
        parse_query_response(body, patient_id)
    }
}

#[async_trait]
impl ObservationRepository for InfluxClient {
    async fn save(&self, observation: &Observation) -> Result<(), BoxError> {
        self.write(observation).await?;
        tracing::debug!(
            observation_id = %observation.id,
            patient_id = %observation.patient_id,
            value = observation.value,
            "Observation stored"
        );
        Ok(())
    }

    async fn fetch_range(
        &self,
        patient_id: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Observation>, BoxError> {
        Ok(self.query_range(patient_id, from, to).await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InfluxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InfluxError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

// ---------------------------------------------------------------------------
// Line protocol
// ---------------------------------------------------------------------------

/// Encode one observation as a line-protocol point (millisecond precision).
pub(crate) fn encode_line(observation: &Observation) -> String {
    let mut line = String::from(MEASUREMENT);

    // Tags in lexical key order; empty tag values are not allowed.
    for (key, value) in [
        ("code", observation.code.as_str()),
        (TAG_PATIENT, observation.patient_id.as_str()),
        ("unit", observation.unit.as_str()),
    ] {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(key);
        line.push('=');
        line.push_str(&escape_tag(value));
    }

    line.push_str(&format!(
        " observation_id=\"{}\",value={} {}",
        escape_field_string(&observation.id),
        observation.value,
        observation.effective_at.timestamp_millis()
    ));
    line
}

/// Line protocol has no newline escape; line breaks become escaped spaces.
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ',' | '=' | ' ' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
    out
}

fn escape_field_string(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\n', '\r'], " ")
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

pub(crate) fn build_range_query(patient_id: &str, from: Timestamp, to: Timestamp) -> String {
    format!(
        "SELECT \"value\", \"unit\", \"code\", \"observation_id\" FROM \"{MEASUREMENT}\" \
         WHERE \"{TAG_PATIENT}\" = '{}' AND time >= '{}' AND time < '{}' \
         ORDER BY time ASC",
        escape_literal(patient_id),
        from.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        to.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl Series {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Map a `/query` JSON body to observations. Rows without a usable time or
/// value are skipped.
pub(crate) fn parse_query_response(
    body: QueryResponse,
    patient_id: &str,
) -> Result<Vec<Observation>, InfluxError> {
    if let Some(err) = body.error {
        return Err(InfluxError::Query(err));
    }

    let mut observations = Vec::new();
    for result in body.results {
        if let Some(err) = result.error {
            return Err(InfluxError::Query(err));
        }
        for series in result.series {
            let (Some(time_idx), Some(value_idx)) = (series.column("time"), series.column("value"))
            else {
                continue;
            };
            let unit_idx = series.column("unit");
            let code_idx = series.column("code");
            let id_idx = series.column("observation_id");

            for row in &series.values {
                let Some(effective_at) = row.get(time_idx).and_then(parse_time) else {
                    tracing::debug!(?row, "Skipping row with unusable time");
                    continue;
                };
                let Some(value) = row.get(value_idx).and_then(serde_json::Value::as_f64) else {
                    tracing::debug!(?row, "Skipping row with unusable value");
                    continue;
                };
                let text = |idx: Option<usize>| {
                    idx.and_then(|i| row.get(i))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                observations.push(Observation {
                    id: text(id_idx),
                    resource_type: RESOURCE_TYPE_OBSERVATION.to_string(),
                    status: DEFAULT_STATUS.to_string(),
                    patient_id: patient_id.to_string(),
                    code: text(code_idx),
                    value,
                    unit: text(unit_idx),
                    effective_at,
                });
            }
        }
    }
    Ok(observations)
}

/// RFC 3339 strings, or integer nanoseconds when the server was asked for epochs.
fn parse_time(value: &serde_json::Value) -> Option<Timestamp> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n.as_i64().map(DateTime::from_timestamp_nanos),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
