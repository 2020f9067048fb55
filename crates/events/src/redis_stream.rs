//! Redis Streams transport.
//!
//! Observations are read through a consumer group (`XREADGROUP`), so several
//! workers, in one process or many, split the stream between them and each
//! entry is handled by one consumer. Entries stay in the consumer's pending
//! list until acknowledged (`XACK`). On start the source first replays its own
//! pending entries (id `0`) left over from a crash, then switches to new
//! entries (id `>`).
//!
//! Entries left pending by a consumer name that no longer reads (a renamed
//! process, or fewer workers after a restart) are taken over with
//! `XAUTOCLAIM` once they have been idle for `claim_idle`. The claim scan runs
//! on start and again every `claim_idle` (requires Redis 6.2 or newer).
//!
//! Every stream entry carries the JSON document in its `payload` field and,
//! optionally, a partition `key` (the patient id).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use vitals_core::stream::{AlertPublisher, MessageSource, ObservationPublisher, StreamMessage};
use vitals_core::{Alert, BoxError, Observation};

use crate::error::StreamError;

/// Entry field holding the JSON document.
pub const PAYLOAD_FIELD: &str = "payload";

/// Entry field holding the partition key.
pub const KEY_FIELD: &str = "key";

/// Maximum time to wait for the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Entries fetched per `XREADGROUP` call.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Pending time after which another consumer's entry may be claimed.
pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);

/// Redis error code returned when the consumer group already exists.
const BUSYGROUP: &str = "BUSYGROUP";

/// Id that asks `XREADGROUP` for entries never delivered to any consumer.
const NEW_ENTRIES: &str = ">";

/// `XAUTOCLAIM` cursor that starts a scan, and marks its end when returned.
const CLAIM_SCAN_START: &str = "0-0";

async fn connect(url: &str) -> Result<ConnectionManager, StreamError> {
    let client = Client::open(url)?;
    tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager())
        .await
        .map_err(|_| StreamError::ConnectTimeout {
            url: url.to_string(),
            timeout: CONNECT_TIMEOUT,
        })?
        .map_err(StreamError::from)
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RedisStreamConfig {
    pub url: String,
    /// Stream key of the observation topic.
    pub stream: String,
    pub group: String,
    /// Consumer name, unique within the group.
    pub consumer: String,
    /// Longest a single read blocks waiting for new entries.
    pub block: Duration,
    /// Entries fetched per read. With `1` nothing is held locally beyond the
    /// entry being handled.
    pub batch_size: usize,
    /// Minimum idle time before a pending entry of another consumer is
    /// claimed. Zero disables claiming.
    pub claim_idle: Duration,
}

impl RedisStreamConfig {
    pub fn new(
        url: impl Into<String>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            block: Duration::from_secs(5),
            batch_size: DEFAULT_BATCH_SIZE,
            claim_idle: DEFAULT_CLAIM_IDLE,
        }
    }
}

/// Consumer-group reader over one stream key.
pub struct RedisStreamSource {
    conn: ConnectionManager,
    config: RedisStreamConfig,
    buffer: VecDeque<StreamMessage>,
    /// Position in this consumer's pending list while replaying; `None` once
    /// the replay is done.
    pending_cursor: Option<String>,
    /// `XAUTOCLAIM` cursor while a claim scan is in progress.
    claim_cursor: Option<String>,
    last_claim: Option<Instant>,
}

impl RedisStreamSource {
    /// Connect and make sure the consumer group exists (creating the stream
    /// if needed).
    pub async fn connect(config: RedisStreamConfig) -> Result<Self, StreamError> {
        let mut conn = connect(&config.url).await?;

        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&config.stream, &config.group, "0")
            .await;
        match created {
            Ok(()) => {
                tracing::info!(stream = %config.stream, group = %config.group, "Created consumer group");
            }
            Err(e) if e.code() == Some(BUSYGROUP) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            stream = %config.stream,
            group = %config.group,
            consumer = %config.consumer,
            "Redis stream source connected"
        );

        Ok(Self {
            conn,
            config,
            buffer: VecDeque::new(),
            pending_cursor: Some("0".to_string()),
            claim_cursor: None,
            last_claim: None,
        })
    }

    fn claim_due(&self) -> bool {
        if self.config.claim_idle.is_zero() {
            return false;
        }
        self.claim_cursor.is_some()
            || self
                .last_claim
                .map_or(true, |at| at.elapsed() >= self.config.claim_idle)
    }

    /// Take over one batch of entries other consumers left idle for at least
    /// `claim_idle`.
    async fn claim_stale(&mut self) -> Result<Vec<StreamId>, StreamError> {
        let cursor = self
            .claim_cursor
            .take()
            .unwrap_or_else(|| CLAIM_SCAN_START.to_string());

        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.claim_idle.as_millis() as u64)
            .arg(&cursor)
            .arg("COUNT")
            .arg(self.config.batch_size.max(1))
            .query_async(&mut self.conn)
            .await?;
        let (next, claimed) = parse_autoclaim(&reply)?;

        if next == CLAIM_SCAN_START {
            self.last_claim = Some(Instant::now());
        } else {
            self.claim_cursor = Some(next);
        }
        if !claimed.is_empty() {
            tracing::info!(
                consumer = %self.config.consumer,
                claimed = claimed.len(),
                "Claimed idle pending entries"
            );
        }
        Ok(claimed)
    }

    async fn fill_buffer(&mut self) -> Result<(), StreamError> {
        if self.pending_cursor.is_none() && self.claim_due() {
            match self.claim_stale().await {
                Ok(claimed) if !claimed.is_empty() => {
                    self.buffer.extend(claimed.into_iter().map(into_message));
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    // Retried after the next claim interval; reading goes on.
                    tracing::warn!(consumer = %self.config.consumer, error = %e, "Claiming idle entries failed");
                    self.last_claim = Some(Instant::now());
                }
            }
        }

        let replaying = self.pending_cursor.is_some();
        let start = self
            .pending_cursor
            .clone()
            .unwrap_or_else(|| NEW_ENTRIES.to_string());

        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(self.config.batch_size.max(1));
        if !replaying {
            options = options.block(self.config.block.as_millis() as usize);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.config.stream], &[&start], &options)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        if replaying {
            match entries.last() {
                Some(last) => self.pending_cursor = Some(last.id.clone()),
                None => {
                    tracing::debug!(consumer = %self.config.consumer, "Pending entries replayed");
                    self.pending_cursor = None;
                }
            }
        }

        for entry in entries {
            self.buffer.push_back(into_message(entry));
        }
        Ok(())
    }
}

/// Split an `XAUTOCLAIM` reply into the next cursor and the claimed entries.
/// Redis 7 appends a third element (deleted ids), which is ignored.
fn parse_autoclaim(reply: &redis::Value) -> redis::RedisResult<(String, Vec<StreamId>)> {
    match reply {
        redis::Value::Array(items) if items.len() >= 2 => {
            let cursor: String = redis::from_redis_value(&items[0])?;
            let claimed: StreamRangeReply = redis::from_redis_value(&items[1])?;
            Ok((cursor, claimed.ids))
        }
        _ => Err((redis::ErrorKind::TypeError, "unexpected XAUTOCLAIM reply").into()),
    }
}

fn into_message(entry: StreamId) -> StreamMessage {
    let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    let key: Option<String> = entry.get(KEY_FIELD);
    StreamMessage {
        id: entry.id,
        key,
        payload,
    }
}

#[async_trait]
impl MessageSource for RedisStreamSource {
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, BoxError> {
        if self.buffer.is_empty() {
            self.fill_buffer().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn acknowledge(&mut self, message: &StreamMessage) -> Result<(), BoxError> {
        let _: i64 = self
            .conn
            .xack(&self.config.stream, &self.config.group, &[&message.id])
            .await
            .map_err(StreamError::from)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Appends alerts and observations to their stream keys with `XADD`.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
    alert_stream: String,
    observation_stream: String,
}

impl RedisPublisher {
    pub async fn connect(
        url: &str,
        alert_stream: impl Into<String>,
        observation_stream: impl Into<String>,
    ) -> Result<Self, StreamError> {
        Ok(Self {
            conn: connect(url).await?,
            alert_stream: alert_stream.into(),
            observation_stream: observation_stream.into(),
        })
    }

    async fn append(&self, stream: &str, key: &str, payload: &str) -> Result<String, StreamError> {
        // ConnectionManager clones share one multiplexed connection.
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(
                stream,
                "*",
                &[(KEY_FIELD, key.as_bytes()), (PAYLOAD_FIELD, payload.as_bytes())],
            )
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl AlertPublisher for RedisPublisher {
    async fn publish_alert(&self, alert: &Alert) -> Result<(), BoxError> {
        let payload = serde_json::to_string(alert).map_err(StreamError::from)?;
        let entry_id = self
            .append(&self.alert_stream, &alert.patient_id, &payload)
            .await?;
        tracing::debug!(alert_id = %alert.id, entry_id = %entry_id, "Alert published");
        Ok(())
    }
}

#[async_trait]
impl ObservationPublisher for RedisPublisher {
    async fn publish_observation(&self, observation: &Observation) -> Result<(), BoxError> {
        let payload = observation.to_json().map_err(StreamError::from)?;
        self.append(&self.observation_stream, &observation.patient_id, &payload)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
