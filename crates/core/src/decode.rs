//! Decoder: raw stream bytes to a validated [`Observation`].
//!
//! Decoding never panics. Malformed JSON and missing or invalid fields are
//! reported as [`DecodeError`] so the consumer can log the message, skip it,
//! and keep reading.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::codes::normalize_code;
use crate::observation::{
    Observation, ObservationMessage, DEFAULT_STATUS, PATIENT_REFERENCE_PREFIX,
    RESOURCE_TYPE_OBSERVATION,
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not a JSON observation object.
    #[error("malformed observation message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid effectiveDateTime `{value}`: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

impl DecodeError {
    /// `true` when the payload parsed as JSON but failed field validation.
    pub fn is_validation(&self) -> bool {
        !matches!(self, DecodeError::Malformed(_))
    }
}

/// Decode and validate one observation message.
pub fn decode_observation(payload: &[u8]) -> Result<Observation, DecodeError> {
    let message: ObservationMessage = serde_json::from_slice(payload)?;
    validate(message)
}

/// Validate an already-parsed message and build the domain [`Observation`].
///
/// Required: `subject.reference` (non-empty), `code.text`,
/// `valueQuantity.value` (finite) and an RFC 3339 `effectiveDateTime`.
/// A missing `id` is replaced by a fresh UUID so alerts can always refer
/// back to the observation that raised them.
pub fn validate(message: ObservationMessage) -> Result<Observation, DecodeError> {
    let resource_type = match message.resource_type {
        Some(rt) if rt != RESOURCE_TYPE_OBSERVATION => {
            return Err(DecodeError::InvalidField {
                field: "resourceType",
                reason: format!("expected {RESOURCE_TYPE_OBSERVATION}, got {rt}"),
            });
        }
        _ => RESOURCE_TYPE_OBSERVATION.to_string(),
    };

    let reference = message
        .subject
        .and_then(|s| s.reference)
        .ok_or(DecodeError::MissingField("subject.reference"))?;
    let patient_id = patient_id_from_reference(&reference);
    if patient_id.is_empty() {
        return Err(DecodeError::InvalidField {
            field: "subject.reference",
            reason: "patient id must not be empty".to_string(),
        });
    }

    let raw_code = message
        .code
        .and_then(|c| c.text)
        .ok_or(DecodeError::MissingField("code.text"))?;
    let code = normalize_code(&raw_code);
    if code.is_empty() {
        return Err(DecodeError::InvalidField {
            field: "code.text",
            reason: "measurement code must not be empty".to_string(),
        });
    }

    let quantity = message
        .value_quantity
        .ok_or(DecodeError::MissingField("valueQuantity"))?;
    let value = quantity
        .value
        .ok_or(DecodeError::MissingField("valueQuantity.value"))?;
    if !value.is_finite() {
        return Err(DecodeError::InvalidField {
            field: "valueQuantity.value",
            reason: format!("{value} is not a finite number"),
        });
    }

    let raw_time = message
        .effective_date_time
        .ok_or(DecodeError::MissingField("effectiveDateTime"))?;
    let effective_at = DateTime::parse_from_rfc3339(raw_time.trim())
        .map_err(|source| DecodeError::InvalidTimestamp {
            value: raw_time.clone(),
            source,
        })?
        .with_timezone(&Utc);

    let id = message
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(Observation {
        id,
        resource_type,
        status: message
            .status
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        patient_id,
        code,
        value,
        unit: quantity.unit.unwrap_or_default(),
        effective_at,
    })
}

/// Strip an optional `Patient/` prefix from a FHIR subject reference.
fn patient_id_from_reference(reference: &str) -> String {
    let trimmed = reference.trim();
    trimmed
        .strip_prefix(PATIENT_REFERENCE_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn heart_rate_message() -> serde_json::Value {
        json!({
            "id": "obs-1",
            "resourceType": "Observation",
            "status": "final",
            "code": {"text": "heart-rate"},
            "subject": {"reference": "Patient/p-42"},
            "effectiveDateTime": "2024-03-01T10:15:00Z",
            "valueQuantity": {"value": 101.0, "unit": "bpm"}
        })
    }

    #[test]
    fn decodes_complete_message() {
        let obs = decode_observation(&payload(heart_rate_message())).unwrap();

        assert_eq!(obs.id, "obs-1");
        assert_eq!(obs.patient_id, "p-42");
        assert_eq!(obs.code, "heart-rate");
        assert_eq!(obs.value, 101.0);
        assert_eq!(obs.unit, "bpm");
        assert_eq!(
            obs.effective_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn non_json_bytes_are_malformed() {
        let err = decode_observation(b"\x00\x01not json").unwrap_err();
        assert_matches!(err, DecodeError::Malformed(_));
        assert!(!err.is_validation());
    }

    #[test]
    fn missing_patient_is_reported() {
        let mut msg = heart_rate_message();
        msg.as_object_mut().unwrap().remove("subject");

        let err = decode_observation(&payload(msg)).unwrap_err();
        assert_matches!(err, DecodeError::MissingField("subject.reference"));
        assert!(err.is_validation());
    }

    #[test]
    fn empty_patient_reference_is_rejected() {
        let mut msg = heart_rate_message();
        msg["subject"]["reference"] = json!("Patient/");

        let err = decode_observation(&payload(msg)).unwrap_err();
        assert_matches!(
            err,
            DecodeError::InvalidField {
                field: "subject.reference",
                ..
            }
        );
    }

    #[test]
    fn missing_value_is_reported() {
        let mut msg = heart_rate_message();
        msg["valueQuantity"] = json!({"unit": "bpm"});

        let err = decode_observation(&payload(msg)).unwrap_err();
        assert_matches!(err, DecodeError::MissingField("valueQuantity.value"));
    }

    #[test]
    fn non_numeric_value_is_malformed() {
        let mut msg = heart_rate_message();
        msg["valueQuantity"]["value"] = json!("fast");

        let err = decode_observation(&payload(msg)).unwrap_err();
        assert_matches!(err, DecodeError::Malformed(_));
    }

    #[test]
    fn invalid_timestamp_is_a_decode_failure() {
        let mut msg = heart_rate_message();
        msg["effectiveDateTime"] = json!("01/03/2024 10:15");

        let err = decode_observation(&payload(msg)).unwrap_err();
        assert_matches!(err, DecodeError::InvalidTimestamp { .. });
    }

    #[test]
    fn wrong_resource_type_is_rejected() {
        let mut msg = heart_rate_message();
        msg["resourceType"] = json!("Patient");

        let err = decode_observation(&payload(msg)).unwrap_err();
        assert_matches!(
            err,
            DecodeError::InvalidField {
                field: "resourceType",
                ..
            }
        );
    }

    #[test]
    fn missing_id_gets_generated() {
        let mut msg = heart_rate_message();
        msg.as_object_mut().unwrap().remove("id");

        let a = decode_observation(&payload(msg.clone())).unwrap();
        let b = decode_observation(&payload(msg)).unwrap();
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn bare_patient_id_and_loose_code_are_accepted() {
        let mut msg = heart_rate_message();
        msg["subject"]["reference"] = json!("p-7");
        msg["code"]["text"] = json!("Heart rate");

        let obs = decode_observation(&payload(msg)).unwrap();
        assert_eq!(obs.patient_id, "p-7");
        assert_eq!(obs.code, "heart-rate");
    }

    #[test]
    fn offset_timestamps_are_converted_to_utc() {
        let mut msg = heart_rate_message();
        msg["effectiveDateTime"] = json!("2024-03-01T12:15:00+02:00");

        let obs = decode_observation(&payload(msg)).unwrap();
        assert_eq!(
            obs.effective_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn encoded_observation_decodes_to_itself() {
        let original = decode_observation(&payload(heart_rate_message())).unwrap();
        let reencoded = original.to_json().unwrap();

        assert_eq!(decode_observation(reencoded.as_bytes()).unwrap(), original);
    }
}
