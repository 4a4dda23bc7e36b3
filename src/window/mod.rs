//! Per-device sliding windows and the trigger logic that drives scoring.
//!
//! Each device owns one bounded buffer. Once a buffer holds `window_size`
//! samples it is primed, and from then on every accepted sample evicts the
//! oldest one and fires exactly one scoring pass over the current window.
//!
//! Locking is per device. The store map sits behind an `RwLock` that is only
//! held for the lookup; the device's own `Mutex` is held from append through
//! scoring, and the returned [`Trigger`] keeps holding it until the caller has
//! written the results out and drops the trigger.

mod store;

pub use self::store::WindowStore;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::features::{self, FeatureVector};
use crate::ingest::Sample;
use crate::scoring::{ScoreResult, ScoringEngine};

/// Fill state of a device window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "samples", rename_all = "snake_case")]
pub enum WindowState {
    /// No samples yet.
    Empty,
    /// Between 1 and `window_size - 1` samples.
    Filling(usize),
    /// Exactly `window_size` samples.
    Primed,
}

/// Bounded most-recent-N buffer of samples for one device.
#[derive(Debug, Clone)]
pub struct Window {
    buf: VecDeque<Sample>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when the window is full.
    pub fn push(&mut self, sample: Sample) -> WindowState {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
        self.state()
    }

    pub fn state(&self) -> WindowState {
        match self.buf.len() {
            0 => WindowState::Empty,
            n if n < self.capacity => WindowState::Filling(n),
            _ => WindowState::Primed,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.state() == WindowState::Primed
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples oldest first.
    pub fn samples(&self) -> std::collections::vec_deque::Iter<'_, Sample> {
        self.buf.iter()
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.buf.iter().cloned().collect()
    }
}

/// Result of a trigger transition: the scored window for one device.
///
/// Holds the device lease. Other samples for the same device wait until this
/// value is dropped.
pub struct Trigger {
    pub device: String,
    /// Timestamp of the sample that fired the trigger.
    pub ts: i64,
    pub features: FeatureVector,
    pub score: ScoreResult,
    /// The window as it was scored, oldest first.
    pub window: Vec<Sample>,
    _lease: OwnedMutexGuard<Window>,
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("device", &self.device)
            .field("ts", &self.ts)
            .field("features", &self.features)
            .field("score", &self.score)
            .field("window_len", &self.window.len())
            .finish()
    }
}

/// Routes samples into device windows and scores primed windows.
#[derive(Clone)]
pub struct WindowManager {
    store: WindowStore,
    engine: Arc<ScoringEngine>,
}

impl WindowManager {
    pub fn new(store: WindowStore, engine: Arc<ScoringEngine>) -> Self {
        Self { store, engine }
    }

    pub fn window_size(&self) -> usize {
        self.store.window_size()
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<ScoringEngine> {
        &self.engine
    }

    /// Accept one sample. Returns a [`Trigger`] when the device window is
    /// primed after the append, `None` while it is still filling.
    pub async fn accept(&self, sample: Sample) -> Option<Trigger> {
        let slot = self.store.slot(&sample.device).await;
        let mut window = slot.lock_owned().await;

        let device = sample.device.clone();
        let ts = sample.ts;

        match window.push(sample) {
            WindowState::Primed => {}
            state => {
                debug!(%device, ?state, "window filling");
                return None;
            }
        }

        let features = features::extract(&window);
        let score = self.engine.score(&features);
        debug!(
            %device,
            score = score.score,
            model_version = %score.model_version,
            "window scored"
        );

        Some(Trigger {
            device,
            ts,
            features,
            score,
            window: window.snapshot(),
            _lease: window,
        })
    }
}
