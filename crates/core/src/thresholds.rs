//! Static clinical threshold rules and their evaluator.
//!
//! Pure logic: [`evaluate`] is a function of the observation's code and value
//! and the configured [`Thresholds`], with no hidden state. Thresholds are
//! loaded once at startup and shared read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::codes::{normalize_code, CODE_HEART_RATE, CODE_SPO2, LABEL_HIGH_HEART_RATE, LABEL_LOW_SPO2};
use crate::error::CoreError;
use crate::observation::Observation;

/// Default heart-rate maximum (bpm).
pub const DEFAULT_HEART_RATE_MAX: f64 = 100.0;

/// Default SpO2 minimum (%).
pub const DEFAULT_SPO2_MIN: f64 = 90.0;

/// Direction in which a value breaches its bound. Equality never breaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Breached when the value is strictly greater than the bound.
    Above,
    /// Breached when the value is strictly less than the bound.
    Below,
}

impl Comparison {
    fn breached(self, value: f64, bound: f64) -> bool {
        match self {
            Self::Above => value > bound,
            Self::Below => value < bound,
        }
    }
}

/// One threshold: "raise `label` when `code` is `comparison` `bound`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub code: String,
    pub label: String,
    pub comparison: Comparison,
    pub bound: f64,
}

impl ThresholdRule {
    pub fn new(
        code: impl Into<String>,
        label: impl Into<String>,
        comparison: Comparison,
        bound: f64,
    ) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
            comparison,
            bound,
        }
    }
}

/// The validated rule set. Several rules may target the same code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thresholds {
    rules: Vec<ThresholdRule>,
}

/// On-disk shape accepted by [`Thresholds::from_json`].
#[derive(Debug, Deserialize)]
struct ThresholdsFile {
    rules: Vec<ThresholdRule>,
}

impl Thresholds {
    /// Validate and normalize a rule list.
    ///
    /// Rejects empty codes or labels and non-finite bounds. Codes are
    /// normalized the same way the decoder normalizes observation codes.
    pub fn new(rules: Vec<ThresholdRule>) -> Result<Self, CoreError> {
        let mut normalized = Vec::with_capacity(rules.len());
        for rule in rules {
            let code = normalize_code(&rule.code);
            if code.is_empty() {
                return Err(CoreError::Validation(
                    "threshold rule code must not be empty".to_string(),
                ));
            }
            let label = rule.label.trim().to_string();
            if label.is_empty() {
                return Err(CoreError::Validation(format!(
                    "threshold rule for {code} must have a label"
                )));
            }
            if !rule.bound.is_finite() {
                return Err(CoreError::Validation(format!(
                    "threshold bound for {code} must be finite, got {}",
                    rule.bound
                )));
            }
            normalized.push(ThresholdRule { code, label, ..rule });
        }
        Ok(Self { rules: normalized })
    }

    /// The two standard vital-sign rules with the given bounds.
    pub fn standard(heart_rate_max: f64, spo2_min: f64) -> Result<Self, CoreError> {
        Self::new(vec![
            ThresholdRule::new(
                CODE_HEART_RATE,
                LABEL_HIGH_HEART_RATE,
                Comparison::Above,
                heart_rate_max,
            ),
            ThresholdRule::new(CODE_SPO2, LABEL_LOW_SPO2, Comparison::Below, spo2_min),
        ])
    }

    /// Parse `{"rules": [{"code", "label", "comparison", "bound"}, ...]}`.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let file: ThresholdsFile = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("invalid thresholds file: {e}")))?;
        Self::new(file.rules)
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            rules: vec![
                ThresholdRule::new(
                    CODE_HEART_RATE,
                    LABEL_HIGH_HEART_RATE,
                    Comparison::Above,
                    DEFAULT_HEART_RATE_MAX,
                ),
                ThresholdRule::new(CODE_SPO2, LABEL_LOW_SPO2, Comparison::Below, DEFAULT_SPO2_MIN),
            ],
        }
    }
}

/// Evaluate one observation against the rule set.
///
/// Returns every triggered label (deduplicated, in rule order). Codes with
/// no rules never trigger and never error.
pub fn evaluate<'t>(observation: &Observation, thresholds: &'t Thresholds) -> Vec<&'t str> {
    let mut labels: Vec<&'t str> = Vec::new();
    for rule in thresholds.rules() {
        if rule.code == observation.code
            && rule.comparison.breached(observation.value, rule.bound)
            && !labels.contains(&rule.label.as_str())
        {
            labels.push(&rule.label);
        }
    }
    labels
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
