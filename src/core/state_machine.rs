//! Capture State Machine
//!
//! Formal lifecycle of a capture session:
//!
//! ```text
//! Idle -> AwaitingHeader -> Collecting -> Stopping -> Idle
//!              |                  |
//!              +--> Idle          +--> Idle (transport failure)
//! ```
//!
//! Every transition is validated and recorded so that an invalid operation is
//! rejected by construction instead of by ad hoc flag checks.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Maximum number of transitions kept in history
pub const MAX_HISTORY: usize = 100;

/// Capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureState {
    /// No session; initial and resting state
    Idle,
    /// `START` sent, waiting for the CSV header
    AwaitingHeader,
    /// Header received, data lines are being persisted
    Collecting,
    /// Session is being torn down
    Stopping,
}

impl CaptureState {
    /// Check if a session exists in this state
    pub fn has_session(&self) -> bool {
        matches!(self, Self::AwaitingHeader | Self::Collecting | Self::Stopping)
    }

    /// Check if `EndCapture` has work to do in this state
    pub fn can_end(&self) -> bool {
        matches!(self, Self::AwaitingHeader | Self::Collecting)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingHeader => write!(f, "awaiting-header"),
            Self::Collecting => write!(f, "collecting"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: CaptureState,
    /// New state
    pub to: CaptureState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    /// State the machine was in
    pub from: CaptureState,
    /// Requested state
    pub to: CaptureState,
}

/// Validated state holder with bounded history
#[derive(Debug)]
pub struct CaptureStateMachine {
    state: CaptureState,
    history: VecDeque<StateTransition>,
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStateMachine {
    /// Create a machine in `Idle`
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            history: VecDeque::new(),
        }
    }

    /// Get current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Recorded transitions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    /// States visited, starting with the origin of the oldest recorded transition
    pub fn path(&self) -> Vec<CaptureState> {
        let mut path: Vec<CaptureState> = self.history.front().map(|t| t.from).into_iter().collect();
        path.extend(self.history.iter().map(|t| t.to));
        path
    }

    /// Transition to a new state
    pub fn transition(
        &mut self,
        to: CaptureState,
        reason: Option<&str>,
    ) -> Result<(), InvalidTransition> {
        let from = self.state;
        if !Self::is_valid_transition(from, to) {
            return Err(InvalidTransition { from, to });
        }

        self.history.push_back(StateTransition {
            from,
            to,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        self.state = to;
        tracing::debug!(%from, %to, reason = reason.unwrap_or(""), "capture state changed");
        Ok(())
    }

    /// Check if transition is valid
    pub fn is_valid_transition(from: CaptureState, to: CaptureState) -> bool {
        use CaptureState::*;

        matches!(
            (from, to),
            (Idle, AwaitingHeader)
                // header received
                | (AwaitingHeader, Collecting)
                // handshake timeout or transport failure
                | (AwaitingHeader, Idle)
                // explicit EndCapture before the header
                | (AwaitingHeader, Stopping)
                | (Collecting, Stopping)
                // transport failure mid-capture
                | (Collecting, Idle)
                | (Stopping, Idle)
        )
    }
}
