//! In-process broker with one observation topic and one alert topic.
//!
//! Observations travel over an mpsc channel whose receiver is shared by all
//! [`MemorySource`]s, so each message goes to exactly one consumer, like a
//! consumer group. Alerts fan out over a `tokio::sync::broadcast` channel to
//! every subscriber.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use vitals_core::stream::{AlertPublisher, MessageSource, ObservationPublisher, StreamMessage};
use vitals_core::{Alert, BoxError, Observation};

use crate::error::StreamError;

/// Default buffer capacity for the alert broadcast channel.
const DEFAULT_ALERT_CAPACITY: usize = 1024;

/// How long a [`MemorySource`] waits for a message before returning `None`.
const DEFAULT_POLL: Duration = Duration::from_millis(200);

/// Shared handle to an in-memory broker. Clones refer to the same topics.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    observations_tx: mpsc::UnboundedSender<StreamMessage>,
    observations_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamMessage>>>,
    alerts: broadcast::Sender<Alert>,
    next_id: AtomicU64,
    acknowledged: Mutex<Vec<String>>,
    fail_alerts: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (observations_tx, observations_rx) = mpsc::unbounded_channel();
        let (alerts, _) = broadcast::channel(DEFAULT_ALERT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                observations_tx,
                observations_rx: Arc::new(tokio::sync::Mutex::new(observations_rx)),
                alerts,
                next_id: AtomicU64::new(1),
                acknowledged: Mutex::new(Vec::new()),
                fail_alerts: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue raw bytes on the observation topic and return the entry id.
    pub fn send_raw(&self, key: Option<&str>, payload: impl Into<Vec<u8>>) -> String {
        let id = format!("{}-0", self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let message = StreamMessage {
            id: id.clone(),
            key: key.map(str::to_string),
            payload: payload.into(),
        };
        // The broker holds a receiver, so the channel cannot be closed here.
        let _ = self.inner.observations_tx.send(message);
        id
    }

    /// A new consumer on the observation topic.
    pub fn source(&self) -> MemorySource {
        MemorySource {
            broker: self.clone(),
            poll: DEFAULT_POLL,
        }
    }

    /// Subscribe to every alert published after this call.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.inner.alerts.subscribe()
    }

    /// Entry ids acknowledged so far, in acknowledgement order.
    pub fn acknowledged(&self) -> Vec<String> {
        lock(&self.inner.acknowledged).clone()
    }

    /// Make subsequent `publish_alert` calls fail (for exercising delivery errors).
    pub fn set_fail_alerts(&self, fail: bool) {
        self.inner.fail_alerts.store(fail, Ordering::Relaxed);
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl AlertPublisher for MemoryBroker {
    async fn publish_alert(&self, alert: &Alert) -> Result<(), BoxError> {
        if self.inner.fail_alerts.load(Ordering::Relaxed) {
            return Err(StreamError::Closed("alerts".to_string()).into());
        }
        // A send error only means there are no subscribers.
        let _ = self.inner.alerts.send(alert.clone());
        Ok(())
    }
}

#[async_trait]
impl ObservationPublisher for MemoryBroker {
    async fn publish_observation(&self, observation: &Observation) -> Result<(), BoxError> {
        let payload = observation.to_json().map_err(StreamError::from)?;
        self.send_raw(Some(&observation.patient_id), payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// One consumer of the in-memory observation topic.
pub struct MemorySource {
    broker: MemoryBroker,
    poll: Duration,
}

impl MemorySource {
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, BoxError> {
        let mut rx = self.broker.inner.observations_rx.lock().await;
        match tokio::time::timeout(self.poll, rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(StreamError::Closed("observations".to_string()).into()),
            Err(_) => Ok(None),
        }
    }

    async fn acknowledge(&mut self, message: &StreamMessage) -> Result<(), BoxError> {
        lock(&self.broker.inner.acknowledged).push(message.id.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
