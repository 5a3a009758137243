//! Per-session analysis state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crewscout_core::error::CrewError;
use crewscout_core::types::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShellState {
    Idle,
    Running { started_at: DateTime<Utc> },
    Succeeded { report: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShellEvent {
    Submit,
    Complete(String),
    Fail(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ShellError {
    #[error("cannot apply {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
    #[error("Please describe your startup idea")]
    BlankIdea,
    #[error("An analysis is already running")]
    AlreadyRunning,
    #[error("No analysis is running")]
    NotRunning,
}

impl ShellState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// The report, only once the run succeeded.
    pub fn report(&self) -> Option<&str> {
        match self {
            Self::Succeeded { report } => Some(report),
            _ => None,
        }
    }

    /// Whole seconds since the run started.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            Self::Running { started_at } => {
                Some((now - *started_at).num_seconds().max(0) as u64)
            }
            _ => None,
        }
    }

    /// The state after `event`. Invalid pairs leave `self` untouched.
    pub fn apply(&self, event: ShellEvent) -> Result<ShellState, ShellError> {
        match (self, event) {
            (Self::Running { .. }, ShellEvent::Complete(report)) => {
                Ok(Self::Succeeded { report })
            }
            (Self::Running { .. }, ShellEvent::Fail(message)) => Ok(Self::Failed { message }),
            (Self::Running { .. }, ShellEvent::Submit) => Err(self.invalid("submit")),
            (_, ShellEvent::Submit) => Ok(Self::Running {
                started_at: Utc::now(),
            }),
            (_, ShellEvent::Complete(_)) => Err(self.invalid("complete")),
            (_, ShellEvent::Fail(_)) => Err(self.invalid("fail")),
        }
    }

    fn invalid(&self, event: &'static str) -> ShellError {
        ShellError::InvalidTransition {
            state: self.name(),
            event,
        }
    }
}

/// Handle given to the task driving one run.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub generation: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct ShellSession {
    state: ShellState,
    generation: u64,
    cancel: Option<CancellationToken>,
    /// When the last run succeeded or failed.
    settled_at: Option<DateTime<Utc>>,
}

impl Default for ShellSession {
    fn default() -> Self {
        Self {
            state: ShellState::Idle,
            generation: 0,
            cancel: None,
            settled_at: None,
        }
    }
}

impl ShellSession {
    fn settle(&mut self, state: ShellState) {
        self.state = state;
        self.cancel = None;
        self.settled_at = Some(Utc::now());
    }

    fn expired(&self, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        match self.settled_at {
            Some(at) if !self.state.is_running() => {
                (now - at).num_seconds().max(0) as u64 >= ttl_secs
            }
            _ => false,
        }
    }
}

/// Shell state for every browser session.
///
/// Settled sessions older than the TTL are swept on every access and read
/// back as `Idle`. Running sessions are never evicted.
#[derive(Debug)]
pub struct ShellSessions {
    sessions: Mutex<HashMap<SessionId, ShellSession>>,
    // Shared across sessions so a recreated session never reuses a number.
    generations: AtomicU64,
    ttl_secs: u64,
}

impl Default for ShellSessions {
    fn default() -> Self {
        Self::with_ttl(3600)
    }
}

impl ShellSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            ttl_secs,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, ShellSession>> {
        // Each update is a single assignment, so a poisoned map is still consistent.
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, s| !s.expired(now, self.ttl_secs));
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "Swept settled sessions");
        }
        sessions
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, id: &SessionId) -> ShellState {
        self.lock()
            .get(id)
            .map(|s| s.state.clone())
            .unwrap_or(ShellState::Idle)
    }

    /// Start a run for `idea`. Discards any previous report.
    pub fn submit(&self, id: &SessionId, idea: &str) -> Result<(ShellState, RunTicket), ShellError> {
        if idea.trim().is_empty() {
            return Err(ShellError::BlankIdea);
        }

        let mut sessions = self.lock();
        let session = sessions.entry(id.clone()).or_default();
        if session.state.is_running() {
            return Err(ShellError::AlreadyRunning);
        }

        session.state = session.state.apply(ShellEvent::Submit)?;
        session.settled_at = None;
        session.generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        session.cancel = Some(cancel.clone());

        Ok((
            session.state.clone(),
            RunTicket {
                generation: session.generation,
                cancel,
            },
        ))
    }

    /// Record the outcome of run `generation`.
    ///
    /// Returns `None` when that run was already cancelled or superseded.
    pub fn finish(&self, id: &SessionId, generation: u64, event: ShellEvent) -> Option<ShellState> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(id)?;
        if session.generation != generation {
            debug!(session = %id, generation, "Dropping outcome of a superseded run");
            return None;
        }
        match session.state.apply(event) {
            Ok(next) => {
                session.settle(next);
                Some(session.state.clone())
            }
            Err(e) => {
                debug!(session = %id, error = %e, "Run outcome ignored");
                None
            }
        }
    }

    /// Cancel the in-flight run; the session fails with "Analysis cancelled".
    pub fn cancel(&self, id: &SessionId) -> Result<ShellState, ShellError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .filter(|s| s.state.is_running())
            .ok_or(ShellError::NotRunning)?;

        if let Some(token) = session.cancel.take() {
            token.cancel();
        }
        let failed = session
            .state
            .apply(ShellEvent::Fail(CrewError::Cancelled.to_string()))?;
        session.settle(failed);
        Ok(session.state.clone())
    }
}
