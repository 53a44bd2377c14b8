//! Thread-safe, time-bounded store of in-flight layer loads.
//!
//! The cache never loads anything itself. It observes progress through a
//! caller-supplied [`LoadProbe`] and decides per session whether the load is
//! still LOADING, READY or in ERROR.
//!
//! READY is a heuristic: the underlying loader has no reliable completion
//! signal, so "progress unchanged for the debounce interval" stands in for
//! "finished". A load that stalls for longer than the debounce interval is
//! reported READY early.
//!
//! All operations share one lock over the whole map. Probes run under that
//! lock; cleanup hooks run after it is released.

mod clock;
mod probe;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use probe::{LoadProbe, ProbeSample, ResourceHealth};
pub use sweeper::{spawn_configured_sweeper, spawn_sweeper, SweeperHandle};

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ReadinessConfig;
use crate::error::ReadinessError;

const NO_FEATURES_REASON: &str = "no features found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Loading,
    Ready,
    Error,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadState::Loading)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadState::Loading => "loading",
            LoadState::Ready => "ready",
            LoadState::Error => "error",
        })
    }
}

/// What a status check returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: LoadState,
    #[serde(rename = "feature_count")]
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// Status line for the user polling this session.
    pub fn message(&self) -> String {
        match self.state {
            LoadState::Loading => format!("layer loading ({} features so far)", self.progress),
            LoadState::Ready => format!("layer loaded ({} features)", self.progress),
            LoadState::Error => self
                .error
                .clone()
                .unwrap_or_else(|| "layer failed to load".to_string()),
        }
    }

    /// Turns a terminal ERROR into [`ReadinessError::LoadFailed`].
    pub fn into_result(self, id: &str) -> Result<Self, ReadinessError> {
        match self.state {
            LoadState::Error => Err(ReadinessError::LoadFailed {
                id: id.to_string(),
                reason: self.message(),
            }),
            _ => Ok(self),
        }
    }
}

struct LoadSession {
    probe: Box<dyn LoadProbe>,
    state: LoadState,
    progress: u64,
    error: Option<String>,
    created_at: Instant,
    last_change_at: Instant,
    last_observed_progress: u64,
}

impl LoadSession {
    fn new(probe: Box<dyn LoadProbe>, now: Instant) -> Self {
        Self {
            probe,
            state: LoadState::Loading,
            progress: 0,
            error: None,
            created_at: now,
            last_change_at: now,
            last_observed_progress: 0,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            progress: self.progress,
            error: self.error.clone(),
        }
    }

    fn fail(&mut self, id: &str, reason: &str) {
        error!("Load session {} failed: {}", id, reason);
        self.state = LoadState::Error;
        self.error = Some(reason.to_string());
    }

    /// Samples the probe and applies the state rules.
    fn observe(&mut self, id: &str, now: Instant, config: &ReadinessConfig) {
        if self.state == LoadState::Error {
            return;
        }

        let sample = self.probe.sample();
        if let Some(reason) = sample.health.failure_reason() {
            self.fail(id, reason);
            return;
        }

        if sample.progress < self.progress {
            warn!(
                "Load session {} reported progress {} below {}; keeping {}",
                id, sample.progress, self.progress, self.progress
            );
        }
        let progress = self.progress.max(sample.progress);
        self.progress = progress;

        if self.state == LoadState::Ready {
            return;
        }

        if progress != self.last_observed_progress || sample.loading {
            debug!(
                "Load session {} progress {} -> {}{}",
                id,
                self.last_observed_progress,
                progress,
                if sample.loading { " (loader busy)" } else { "" }
            );
            self.last_observed_progress = progress;
            self.last_change_at = now;
        }

        if sample.loading {
            return;
        }

        let quiet_for = now.saturating_duration_since(self.last_change_at);
        if quiet_for >= config.debounce() && (progress > 0 || sample.has_extent) {
            if progress > 0 {
                info!("Load session {} ready with {} features", id, progress);
            } else {
                info!("Load session {} ready: no features but a valid extent", id);
            }
            self.state = LoadState::Ready;
            return;
        }

        let age = now.saturating_duration_since(self.created_at);
        if progress == 0 && !sample.has_extent && age > config.grace_period() {
            self.fail(id, NO_FEATURES_REASON);
        }
    }
}

/// Concurrent map of load sessions keyed by caller-supplied id.
pub struct LayerReadinessCache<K: Clock = SystemClock> {
    config: ReadinessConfig,
    clock: K,
    sessions: Mutex<HashMap<String, LoadSession>>,
}

impl LayerReadinessCache<SystemClock> {
    pub fn new(config: ReadinessConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for LayerReadinessCache<SystemClock> {
    fn default() -> Self {
        Self::new(ReadinessConfig::default())
    }
}

impl<K: Clock> LayerReadinessCache<K> {
    pub fn with_clock(config: ReadinessConfig, clock: K) -> Self {
        Self {
            config,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Registers a new LOADING session.
    ///
    /// An id that is already present is rejected; the caller must `remove`
    /// it first. The rejected probe is released, since no session owns it.
    pub fn insert<P>(&self, id: impl Into<String>, probe: P) -> Result<(), ReadinessError>
    where
        P: LoadProbe + 'static,
    {
        let id = id.into();
        let probe: Box<dyn LoadProbe> = Box::new(probe);

        let rejected = {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(&id) {
                Some(probe)
            } else {
                let now = self.clock.now();
                sessions.insert(id.clone(), LoadSession::new(probe, now));
                None
            }
        };

        match rejected {
            Some(probe) => {
                warn!("Load session {} already exists; releasing the new probe", id);
                probe.release();
                Err(ReadinessError::DuplicateSession(id))
            }
            None => {
                info!("Load session {} registered", id);
                Ok(())
            }
        }
    }

    /// Refreshes a session from its probe and returns the result.
    pub fn observe(&self, id: &str) -> Result<SessionSnapshot, ReadinessError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| ReadinessError::SessionNotFound(id.to_string()))?;

        let now = self.clock.now();
        session.observe(id, now, &self.config);
        Ok(session.snapshot())
    }

    /// Deletes a session and releases its probe. Absent ids are a no-op.
    pub fn remove(&self, id: &str) {
        let removed = self.sessions.lock().remove(id);
        if let Some(session) = removed {
            debug!("Load session {} removed in state {}", id, session.state);
            session.probe.release();
        }
    }

    /// Evicts every session created more than `max_age` ago, in any state.
    /// Returns the number of evicted sessions.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let expired: Vec<(String, LoadSession)> = {
            let mut sessions = self.sessions.lock();
            let now = self.clock.now();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| now.saturating_duration_since(s.created_at) > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };

        let count = expired.len();
        for (id, session) in expired {
            info!("Evicting expired load session {} (state {})", id, session.state);
            session.probe.release();
        }
        count
    }

    /// [`sweep_expired`](Self::sweep_expired) with the configured maximum
    /// age.
    pub fn sweep(&self) -> usize {
        self.sweep_expired(self.config.max_age())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Clock> Drop for LayerReadinessCache<K> {
    fn drop(&mut self) {
        let sessions = std::mem::take(self.sessions.get_mut());
        if !sessions.is_empty() {
            debug!("Releasing {} load sessions on cache drop", sessions.len());
        }
        for (_, session) in sessions {
            session.probe.release();
        }
    }
}
