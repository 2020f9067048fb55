//! The vitals processing service.
//!
//! Consumes observations from the stream, raises threshold and anomaly
//! alerts, delivers them to the alert stream and the alert store, and records
//! every observation in the time-series store.

pub mod config;
pub mod consumer;
pub mod processor;
pub mod shutdown;
pub mod sink;
pub mod window_sweep;

pub use config::{ConfigError, LogFormat, StreamBackend, WorkerConfig};
pub use consumer::{Consumer, ConsumerStats};
pub use processor::{ObservationProcessor, ProcessError, ProcessOutcome};
pub use shutdown::{shutdown_signal, DrainReport, ShutdownCoordinator, ShutdownState};
pub use sink::{AlertSink, DeliveryOrder, MetricsSink, SinkError};
