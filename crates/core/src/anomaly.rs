//! Sliding-window z-score anomaly detection.
//!
//! [`DetectorState`] keeps the most recent `window_size` values plus running
//! sums, so mean and population variance are O(1) per observation. A new
//! value is scored against the window as it stood *before* the value was
//! admitted, then pushed in (evicting the oldest value FIFO once the window
//! is full). Scoring against prior history keeps a single outlier from
//! diluting its own reference statistics.
//!
//! [`AnomalyDetector`] owns one or many states behind mutexes so only one
//! `add` mutates a given window at a time, even when several consumer
//! workers share the detector.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::CoreError;

/// Default number of values kept per window.
pub const DEFAULT_WINDOW_SIZE: usize = 30;

/// Default z-score above which a value is anomalous.
pub const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// Minimum number of prior samples needed before anything is flagged.
const MIN_SAMPLES: usize = 2;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub window_size: usize,
    pub z_threshold: f64,
}

impl DetectorConfig {
    pub fn new(window_size: usize, z_threshold: f64) -> Result<Self, CoreError> {
        if window_size < MIN_SAMPLES {
            return Err(CoreError::Validation(format!(
                "detector window size must be at least {MIN_SAMPLES}, got {window_size}"
            )));
        }
        if !z_threshold.is_finite() || z_threshold <= 0.0 {
            return Err(CoreError::Validation(format!(
                "detector z-score threshold must be a positive number, got {z_threshold}"
            )));
        }
        Ok(Self {
            window_size,
            z_threshold,
        })
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            z_threshold: DEFAULT_Z_THRESHOLD,
        }
    }
}

/// Whether all patients share one window or each patient has its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorScope {
    /// One process-wide window mixing every patient's readings.
    Shared,
    /// One window per patient and measurement code, created on the first
    /// reading of that code for that patient.
    #[default]
    PerPatient,
}

impl FromStr for DetectorScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" | "global" => Ok(Self::Shared),
            "per_patient" | "per-patient" | "patient" => Ok(Self::PerPatient),
            other => Err(CoreError::Validation(format!(
                "unknown detector scope: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for DetectorScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::PerPatient => write!(f, "per_patient"),
        }
    }
}

// ---------------------------------------------------------------------------
// DetectorState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DetectorState {
    window: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
    capacity: usize,
    z_threshold: f64,
    /// Evictions since the sums were last rebuilt from the window.
    evictions: usize,
}

impl DetectorState {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size + 1),
            sum: 0.0,
            sum_sq: 0.0,
            capacity: config.window_size,
            z_threshold: config.z_threshold,
            evictions: 0,
        }
    }

    /// Score `value` against the current window, then admit it.
    ///
    /// Returns `true` when the value's z-score exceeds the threshold.
    pub fn add(&mut self, value: f64) -> bool {
        let anomalous = self
            .z_score(value)
            .is_some_and(|z| z > self.z_threshold);
        self.push(value);
        anomalous
    }

    /// Z-score of `value` relative to the current window.
    ///
    /// `None` with fewer than two samples. A constant window scores an equal
    /// value as `0` and any other value as infinitely far away.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.window.len() < MIN_SAMPLES {
            return None;
        }
        let mean = self.mean()?;
        let variance = self.variance()?;

        if variance > mean * mean * f64::EPSILON {
            return Some((value - mean).abs() / variance.sqrt());
        }

        // The running sums cancel to zero on nearly constant windows; recompute
        // from the stored values before declaring the window constant.
        let (mean, variance) = self.exact_moments();
        if variance == 0.0 {
            let constant_match = self.window.iter().all(|&v| v == value);
            return Some(if constant_match { 0.0 } else { f64::INFINITY });
        }
        Some((value - mean).abs() / variance.sqrt())
    }

    /// Two-pass mean and population variance over the window.
    fn exact_moments(&self) -> (f64, f64) {
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / n;
        (mean, variance)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.sum / self.window.len() as f64)
    }

    /// Population variance, clamped at zero against round-off.
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.window.len() as f64;
        Some((self.sum_sq / n - mean * mean).max(0.0))
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Window contents, oldest first.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    fn push(&mut self, value: f64) {
        self.window.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;

        while self.window.len() > self.capacity {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= oldest;
                self.sum_sq -= oldest * oldest;
                self.evictions += 1;
            }
        }

        // Subtracting evicted values accumulates round-off; rebuild the sums
        // once per full turnover of the window.
        if self.evictions >= self.capacity {
            self.sum = self.window.iter().sum();
            self.sum_sq = self.window.iter().map(|v| v * v).sum();
            self.evictions = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// AnomalyDetector
// ---------------------------------------------------------------------------

/// Per-patient windows are keyed by `(patient_id, code)` so each vital sign
/// keeps its own history.
type WindowKey = (String, String);

struct Slot {
    state: Arc<Mutex<DetectorState>>,
    last_seen: Instant,
}

enum Windows {
    Shared(Mutex<DetectorState>),
    PerPatient(Mutex<HashMap<WindowKey, Slot>>),
}

/// Thread-safe detector shared by every consumer worker.
pub struct AnomalyDetector {
    config: DetectorConfig,
    scope: DetectorScope,
    windows: Windows,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig, scope: DetectorScope) -> Self {
        let windows = match scope {
            DetectorScope::Shared => Windows::Shared(Mutex::new(DetectorState::new(config))),
            DetectorScope::PerPatient => Windows::PerPatient(Mutex::new(HashMap::new())),
        };
        Self {
            config,
            scope,
            windows,
        }
    }

    /// Feed one reading; returns `true` if it is anomalous.
    ///
    /// In [`DetectorScope::Shared`] mode `patient_id` and `code` are ignored.
    pub fn add(&self, patient_id: &str, code: &str, value: f64) -> bool {
        match &self.windows {
            Windows::Shared(state) => lock(state).add(value),
            Windows::PerPatient(states) => {
                // Hold the map lock only long enough to find the window.
                let state = {
                    let mut map = lock(states);
                    let slot = map
                        .entry((patient_id.to_string(), code.to_string()))
                        .or_insert_with(|| Slot {
                            state: Arc::new(Mutex::new(DetectorState::new(self.config))),
                            last_seen: Instant::now(),
                        });
                    slot.last_seen = Instant::now();
                    Arc::clone(&slot.state)
                };
                let anomalous = lock(&state).add(value);
                anomalous
            }
        }
    }

    /// Drop per-patient windows that have not seen a reading for `max_idle`.
    ///
    /// Returns the number of windows removed. A no-op in shared mode.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        match &self.windows {
            Windows::Shared(_) => 0,
            Windows::PerPatient(states) => {
                let mut map = lock(states);
                let before = map.len();
                map.retain(|_, slot| slot.last_seen.elapsed() < max_idle);
                before - map.len()
            }
        }
    }

    pub fn scope(&self) -> DetectorScope {
        self.scope
    }

    pub fn config(&self) -> DetectorConfig {
        self.config
    }

    /// Number of independent windows currently held.
    pub fn window_count(&self) -> usize {
        match &self.windows {
            Windows::Shared(_) => 1,
            Windows::PerPatient(states) => lock(states).len(),
        }
    }

    /// Copy of the window used for `patient_id` and `code`, if one exists yet.
    pub fn snapshot(&self, patient_id: &str, code: &str) -> Option<DetectorState> {
        match &self.windows {
            Windows::Shared(state) => Some(lock(state).clone()),
            Windows::PerPatient(states) => {
                let key = (patient_id.to_string(), code.to_string());
                let state = lock(states).get(&key).map(|slot| Arc::clone(&slot.state))?;
                let snapshot = lock(&state).clone();
                Some(snapshot)
            }
        }
    }
}

/// Lock, recovering the guard if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
