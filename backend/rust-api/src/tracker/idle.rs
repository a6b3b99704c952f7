use std::time::Duration;
use tokio::time::Instant;

/// Change in attention state worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
    /// `hidden` when the host surface was hidden rather than the timeout elapsing.
    BecameIdle { hidden: bool },
    /// `visible` when the surface becoming visible ended the idle period.
    BecameActive { visible: bool },
}

/// Classifies the learner as idle or active from input and visibility
/// signals. Time is always supplied by the caller.
#[derive(Debug, Clone)]
pub struct IdleDetector {
    timeout: Duration,
    last_input: Instant,
    hidden: bool,
    idle_since: Option<Instant>,
}

impl IdleDetector {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_input: now,
            hidden: false,
            idle_since: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    pub fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// When the timeout will fire, if the learner is currently active.
    pub fn deadline(&self) -> Option<Instant> {
        if self.is_idle() {
            None
        } else {
            Some(self.last_input + self.timeout)
        }
    }

    /// Pointer, key, scroll or touch input. Ignored while the surface is hidden.
    pub fn record_input(&mut self, now: Instant) -> Option<IdleTransition> {
        if self.hidden {
            return None;
        }
        self.last_input = now;
        self.idle_since
            .take()
            .map(|_| IdleTransition::BecameActive { visible: false })
    }

    pub fn set_hidden(&mut self, hidden: bool, now: Instant) -> Option<IdleTransition> {
        if hidden == self.hidden {
            return None;
        }
        self.hidden = hidden;

        if hidden {
            if self.is_idle() {
                return None;
            }
            self.idle_since = Some(now);
            return Some(IdleTransition::BecameIdle { hidden: true });
        }

        // Becoming visible counts as input.
        self.last_input = now;
        self.idle_since
            .take()
            .map(|_| IdleTransition::BecameActive { visible: true })
    }

    /// Applies the timeout as of `now`.
    pub fn poll(&mut self, now: Instant) -> Option<IdleTransition> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.idle_since = Some(now);
                Some(IdleTransition::BecameIdle { hidden: false })
            }
            _ => None,
        }
    }
}
