//! Well-known measurement codes, rule labels and alert types.
//!
//! These are the canonical strings used on the observation stream, in the
//! threshold rules, and in the `type` column of stored alerts.

/// Heart rate in beats per minute.
pub const CODE_HEART_RATE: &str = "heart-rate";

/// Peripheral oxygen saturation in percent.
pub const CODE_SPO2: &str = "spo2";

/// Rule label raised when heart rate exceeds its configured maximum.
pub const LABEL_HIGH_HEART_RATE: &str = "HighHeartRate";

/// Rule label raised when SpO2 falls below its configured minimum.
pub const LABEL_LOW_SPO2: &str = "LowSpO2";

/// Alert type for statistical outliers flagged by the anomaly detector.
pub const ALERT_TYPE_ANOMALY: &str = "Anomaly";

/// Separator used when several rule labels are joined into one alert type.
pub const LABEL_SEPARATOR: char = ',';

/// Normalize a measurement code to its canonical form.
///
/// Producers are inconsistent (`heart_rate`, `Heart rate`, `HEART-RATE`), so
/// codes are trimmed, lower-cased, and spaces/underscores become `-`.
pub fn normalize_code(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}
