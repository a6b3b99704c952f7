//! Client-side activity tracking: idle detection, phase timing, and batched
//! heartbeat delivery to the compliance API.
//!
//! Counters held here are a display cache. The server's `activeSeconds` is
//! authoritative and overwrites the local value on every reply.

use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::DEFAULT_MAX_EVENTS_PER_HEARTBEAT;
use crate::models::event_types;
use crate::models::{ActivityEventInput, HeartbeatRequest, HeartbeatResponse};

pub mod idle;
pub mod transport;

pub use idle::{IdleDetector, IdleTransition};
pub use transport::{HeartbeatTransport, HttpTransport, TransportError};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub heartbeat_period: Duration,
    /// Events per heartbeat. Clamped to `DEFAULT_MAX_EVENTS_PER_HEARTBEAT`;
    /// servers configured with a lower cap reject the batch and it stays queued.
    pub max_batch: usize,
    pub idle_timeout: Duration,
    pub max_pending_events: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(30),
            max_batch: 50,
            idle_timeout: Duration::from_secs(120),
            max_pending_events: 1000,
        }
    }
}

/// Result of one heartbeat round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Accepted(HeartbeatResponse),
    RateLimited { active_seconds: u64 },
    /// Delivery failed; the batch was put back.
    Failed,
    /// The server no longer accepts heartbeats for this session.
    Stopped,
}

struct TrackerState {
    current_phase: Option<String>,
    phase_started: Option<Instant>,
    phase_timings: HashMap<String, u64>,
    pending: VecDeque<ActivityEventInput>,
    confirmed_active_seconds: u64,
    idle: IdleDetector,
    stopped: bool,
}

impl TrackerState {
    fn enqueue(&mut self, event: ActivityEventInput, cap: usize) {
        self.pending.push_back(event);
        self.enforce_cap(cap);
    }

    fn enforce_cap(&mut self, cap: usize) {
        while self.pending.len() > cap {
            if let Some(dropped) = self.pending.pop_front() {
                tracing::warn!(
                    "Activity event queue full, dropping oldest event {}",
                    dropped.event_type
                );
            }
        }
    }

    fn event(&self, event_type: &str, metadata: Option<serde_json::Value>) -> ActivityEventInput {
        ActivityEventInput {
            event_type: event_type.to_string(),
            phase: self.current_phase.clone(),
            metadata,
            timestamp: Some(Utc::now()),
        }
    }

    /// Accumulated timings plus the running phase's elapsed time.
    fn timings_snapshot(&self, now: Instant) -> HashMap<String, u64> {
        let mut timings = self.phase_timings.clone();
        if let (Some(phase), Some(started)) = (&self.current_phase, self.phase_started) {
            *timings.entry(phase.clone()).or_insert(0) += (now - started).as_secs();
        }
        timings
    }

    fn apply_idle_transition(&mut self, transition: IdleTransition, cap: usize) {
        match transition {
            IdleTransition::BecameIdle { hidden } => {
                let event = self.event(event_types::IDLE_START, None);
                self.enqueue(event, cap);
                if hidden {
                    let event = self.event(event_types::TAB_HIDDEN, None);
                    self.enqueue(event, cap);
                }
            }
            IdleTransition::BecameActive { visible } => {
                let event = self.event(event_types::IDLE_END, None);
                self.enqueue(event, cap);
                if visible {
                    let event = self.event(event_types::TAB_VISIBLE, None);
                    self.enqueue(event, cap);
                }
            }
        }
    }
}

/// Tracks one session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ActivityTracker {
    session_id: String,
    config: TrackerConfig,
    transport: Arc<dyn HeartbeatTransport>,
    state: Arc<Mutex<TrackerState>>,
    idle_changed: Arc<Notify>,
}

impl ActivityTracker {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn HeartbeatTransport>,
        mut config: TrackerConfig,
    ) -> Self {
        if config.max_batch > DEFAULT_MAX_EVENTS_PER_HEARTBEAT {
            tracing::warn!(
                "Tracker batch size {} exceeds the heartbeat event cap, using {}",
                config.max_batch,
                DEFAULT_MAX_EVENTS_PER_HEARTBEAT
            );
            config.max_batch = DEFAULT_MAX_EVENTS_PER_HEARTBEAT;
        }
        let state = TrackerState {
            current_phase: None,
            phase_started: None,
            phase_timings: HashMap::new(),
            pending: VecDeque::new(),
            confirmed_active_seconds: 0,
            idle: IdleDetector::new(config.idle_timeout, Instant::now()),
            stopped: false,
        };
        Self {
            session_id: session_id.into(),
            config,
            transport,
            state: Arc::new(Mutex::new(state)),
            idle_changed: Arc::new(Notify::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Closes the running phase (if any) and opens `name`.
    pub fn set_phase(&self, name: &str) {
        let now = Instant::now();
        let cap = self.config.max_pending_events;
        let mut state = self.state();

        if let (Some(previous), Some(started)) =
            (state.current_phase.clone(), state.phase_started.take())
        {
            let elapsed = (now - started).as_secs();
            *state.phase_timings.entry(previous).or_insert(0) += elapsed;
            let event = state.event(
                event_types::PHASE_EXITED,
                Some(json!({ "elapsedSeconds": elapsed })),
            );
            state.enqueue(event, cap);
        }

        state.current_phase = Some(name.to_string());
        state.phase_started = Some(now);
        let event = state.event(event_types::PHASE_ENTERED, None);
        state.enqueue(event, cap);
    }

    pub fn log_event(&self, event_type: &str, metadata: Option<serde_json::Value>) {
        let cap = self.config.max_pending_events;
        let mut state = self.state();
        let event = state.event(event_type, metadata);
        state.enqueue(event, cap);
    }

    pub fn record_input(&self) {
        let cap = self.config.max_pending_events;
        let mut state = self.state();
        if let Some(transition) = state.idle.record_input(Instant::now()) {
            state.apply_idle_transition(transition, cap);
            self.idle_changed.notify_one();
        }
    }

    pub fn set_hidden(&self, hidden: bool) {
        let cap = self.config.max_pending_events;
        let mut state = self.state();
        if let Some(transition) = state.idle.set_hidden(hidden, Instant::now()) {
            state.apply_idle_transition(transition, cap);
            self.idle_changed.notify_one();
        }
    }

    fn check_idle(&self) {
        let cap = self.config.max_pending_events;
        let mut state = self.state();
        if let Some(transition) = state.idle.poll(Instant::now()) {
            state.apply_idle_transition(transition, cap);
        }
    }

    fn idle_deadline(&self) -> Option<Instant> {
        self.state().idle.deadline()
    }

    pub fn is_idle(&self) -> bool {
        self.state().idle.is_idle()
    }

    pub fn current_phase(&self) -> Option<String> {
        self.state().current_phase.clone()
    }

    pub fn phase_timings(&self) -> HashMap<String, u64> {
        self.state().timings_snapshot(Instant::now())
    }

    pub fn pending_events(&self) -> Vec<ActivityEventInput> {
        self.state().pending.iter().cloned().collect()
    }

    /// Last `activeSeconds` the server confirmed.
    pub fn confirmed_active_seconds(&self) -> u64 {
        self.state().confirmed_active_seconds
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    /// Sends one heartbeat carrying up to `max_batch` pending events.
    pub async fn heartbeat(&self) -> HeartbeatOutcome {
        let now = Instant::now();
        let cap = self.config.max_pending_events;

        let (request, batch_len) = {
            let mut state = self.state();
            if state.stopped {
                return HeartbeatOutcome::Stopped;
            }
            if let Some(transition) = state.idle.poll(now) {
                state.apply_idle_transition(transition, cap);
            }

            let take = state.pending.len().min(self.config.max_batch);
            let batch: Vec<ActivityEventInput> = state.pending.drain(..take).collect();
            let request = HeartbeatRequest {
                is_active: !state.idle.is_idle(),
                current_phase: state.current_phase.clone(),
                events: batch,
                phase_timings: Some(state.timings_snapshot(now)),
            };
            (request, take)
        };

        let result = self.transport.send(&self.session_id, &request).await;

        let mut state = self.state();
        match result {
            Ok(response) => {
                state.confirmed_active_seconds = response.active_seconds;
                HeartbeatOutcome::Accepted(response)
            }
            Err(TransportError::RateLimited { active_seconds }) => {
                state.confirmed_active_seconds = active_seconds;
                requeue(&mut state, request.events, cap);
                tracing::debug!(
                    "Heartbeat for {} rate limited, {} events re-queued",
                    self.session_id,
                    batch_len
                );
                HeartbeatOutcome::RateLimited { active_seconds }
            }
            Err(e) if e.is_terminal() => {
                state.stopped = true;
                tracing::info!("Stopping activity tracker for {}: {}", self.session_id, e);
                HeartbeatOutcome::Stopped
            }
            Err(e) => {
                requeue(&mut state, request.events, cap);
                tracing::warn!(
                    "Heartbeat for {} failed, {} events re-queued: {}",
                    self.session_id,
                    batch_len,
                    e
                );
                HeartbeatOutcome::Failed
            }
        }
    }

    /// Spawns the heartbeat loop. The first heartbeat fires immediately.
    pub fn start(&self) -> TrackerHandle {
        let tracker = self.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.heartbeat_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let idle_deadline = tracker.idle_deadline();
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if tracker.heartbeat().await == HeartbeatOutcome::Stopped {
                            break;
                        }
                    }
                    _ = wait_until(idle_deadline) => tracker.check_idle(),
                    // Re-arm the idle deadline after leaving the idle state.
                    _ = tracker.idle_changed.notified() => {}
                }
            }

            tracing::debug!("Activity tracker for {} stopped", tracker.session_id);
        });

        TrackerHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

fn requeue(state: &mut TrackerState, batch: Vec<ActivityEventInput>, cap: usize) {
    for event in batch.into_iter().rev() {
        state.pending.push_front(event);
    }
    state.enforce_cap(cap);
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Owns the running heartbeat loop. Dropping the handle stops the loop.
pub struct TrackerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    /// Stops the loop and waits for it to exit.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Activity tracker task failed: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
