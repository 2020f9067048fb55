//! Observation model and its stream wire format.
//!
//! [`ObservationMessage`] mirrors the JSON published on the observation
//! topic (a small FHIR `Observation` subset). Every field is optional at the
//! serde level so the decoder can report exactly which one is missing.
//! [`Observation`] is the validated, immutable form used by the pipeline.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// FHIR resource type carried by every observation message.
pub const RESOURCE_TYPE_OBSERVATION: &str = "Observation";

/// Status assumed when the producer omits one.
pub const DEFAULT_STATUS: &str = "final";

/// Prefix of FHIR patient references (`Patient/<id>`).
pub const PATIENT_REFERENCE_PREFIX: &str = "Patient/";

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// A single validated vital-sign measurement for one patient.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: String,
    pub resource_type: String,
    pub status: String,
    /// Bare patient id (the `Patient/` prefix is stripped by the decoder).
    pub patient_id: String,
    /// Normalized measurement code, see [`crate::codes::normalize_code`].
    pub code: String,
    pub value: f64,
    pub unit: String,
    pub effective_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeText {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueQuantity {
    pub value: Option<f64>,
    pub unit: Option<String>,
}

/// JSON shape of an observation on the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<String>,
    pub code: Option<CodeText>,
    pub subject: Option<Subject>,
    /// RFC 3339 date-time string.
    pub effective_date_time: Option<String>,
    pub value_quantity: Option<ValueQuantity>,
}

impl From<&Observation> for ObservationMessage {
    fn from(obs: &Observation) -> Self {
        Self {
            id: Some(obs.id.clone()),
            resource_type: Some(obs.resource_type.clone()),
            status: Some(obs.status.clone()),
            code: Some(CodeText {
                text: Some(obs.code.clone()),
            }),
            subject: Some(Subject {
                reference: Some(format!("{PATIENT_REFERENCE_PREFIX}{}", obs.patient_id)),
            }),
            effective_date_time: Some(obs.effective_at.to_rfc3339()),
            value_quantity: Some(ValueQuantity {
                value: Some(obs.value),
                unit: Some(obs.unit.clone()),
            }),
        }
    }
}

impl Observation {
    /// Encode this observation in the stream wire format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&ObservationMessage::from(self))
    }
}
