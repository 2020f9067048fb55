//! Vital-sign telemetry domain logic.
//!
//! Everything in this crate is pure (no network or database access) so the
//! processing rules can be tested in isolation:
//!
//! - [`observation`] / [`decode`]: the stream wire format and the decoder
//!   that turns raw bytes into a validated [`Observation`].
//! - [`thresholds`]: static clinical threshold rules and the evaluator.
//! - [`anomaly`]: the sliding-window z-score detector.
//! - [`alert`]: the [`Alert`] record and the factory that builds it.
//! - [`stream`] / [`repository`]: traits implemented by the transport and
//!   storage adapters in the sibling crates.

pub mod alert;
pub mod anomaly;
pub mod codes;
pub mod decode;
pub mod error;
pub mod observation;
pub mod repository;
pub mod stream;
pub mod thresholds;
pub mod types;

pub use alert::{Alert, AlertFactory};
pub use anomaly::{AnomalyDetector, DetectorConfig, DetectorScope, DetectorState};
pub use decode::{decode_observation, DecodeError};
pub use error::{BoxError, CoreError};
pub use observation::Observation;
pub use repository::{AlertRepository, ObservationRepository};
pub use stream::{AlertPublisher, MessageSource, ObservationPublisher, StreamMessage};
pub use thresholds::{evaluate, Comparison, ThresholdRule, Thresholds};
