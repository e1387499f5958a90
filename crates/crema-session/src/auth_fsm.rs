//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                    ┌─────────────┐
//!     ┌─────────────►│  Anonymous  │◄──────────────────────────┐
//!     │              └──┬───┬───┬──┘                           │
//!     │   LoginAttempt  │   │   │ ResetRequested               │
//!     │                 ▼   │   ▼                              │
//!     │       ┌───────────┐ │ ┌──────────────────────────────┐ │
//!     │       │ LoggingIn │ │ │ AwaitingPasswordResetConfirm │ │
//!     │       └─────┬─────┘ │ └──────────────┬───────────────┘ │
//!     │             │       │ RegisterAccepted│ PasscodeConfirmed│
//!     │ LoginSuccess│       ▼                ▼                 │
//!     │             │ ┌────────────────┐ ┌────────────────────┐│
//!     │             │ │ AwaitingRegist.│ │ AwaitingNewPassword├┘ ResetCompleted
//!     │             │ └───────┬────────┘ └────────────────────┘
//!     │             ▼         │ PasscodeLoginSuccess
//!     │     ┌───────────────┐◄┘
//!     │     │ Authenticated │◄──── RefreshSuccess / RefreshAborted
//!     │     └──┬─────────┬──┘
//!     │        │         │ TokenStale
//!     │        │         ▼
//!     │        │   ┌────────────┐ RefreshFailed
//!     │        │   │ Refreshing ├──────────────► Anonymous
//!     │        │   └────────────┘
//!     │        │ LogoutRequested
//!     │        ▼
//!     │   ┌────────────┐
//!     └───┤ LoggingOut │ LogoutComplete
//!         └────────────┘
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Anonymous)

    Anonymous => {
        LoginAttempt => LoggingIn,
        RegisterAccepted => AwaitingRegistrationConfirmation,
        ResetRequested => AwaitingPasswordResetConfirmation,
        // Stored session found valid on startup
        SessionRestored => Authenticated
    },
    LoggingIn => {
        LoginSuccess => Authenticated,
        LoginFailed => Anonymous
    },
    AwaitingRegistrationConfirmation => {
        PasscodeLoginSuccess => Authenticated,
        // Account confirmed, password login still required
        PasscodeConfirmed => Anonymous,
        // Passcode re-sent by registering again
        RegisterAccepted => AwaitingRegistrationConfirmation,
        FlowCancelled => Anonymous,
        LoginAttempt => LoggingIn
    },
    AwaitingPasswordResetConfirmation => {
        PasscodeConfirmed => AwaitingNewPassword,
        ResetRequested => AwaitingPasswordResetConfirmation,
        FlowCancelled => Anonymous,
        LoginAttempt => LoggingIn
    },
    AwaitingNewPassword => {
        ResetCompleted => Anonymous,
        FlowCancelled => Anonymous,
        LoginAttempt => LoggingIn
    },
    Authenticated => {
        TokenStale => Refreshing,
        LogoutRequested => LoggingOut
    },
    Refreshing => {
        RefreshSuccess => Authenticated,
        RefreshRetry => Refreshing,
        // Transient failure, credentials kept
        RefreshAborted => Authenticated,
        RefreshFailed => Anonymous,
        LogoutRequested => LoggingOut
    },
    LoggingOut => {
        LogoutComplete => Anonymous
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Anonymous,
    LoggingIn,
    AwaitingRegistrationConfirmation,
    AwaitingPasswordResetConfirmation,
    AwaitingNewPassword,
    Authenticated,
    Refreshing,
    LoggingOut,
}

impl SessionState {
    /// True while a session record is held (Authenticated or Refreshing).
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }

    /// True for states that only exist while an operation is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionState::LoggingIn | SessionState::Refreshing | SessionState::LoggingOut
        )
    }

    /// True while a registration or password-reset flow is open.
    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingRegistrationConfirmation
                | SessionState::AwaitingPasswordResetConfirmation
                | SessionState::AwaitingNewPassword
        )
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Anonymous => SessionState::Anonymous,
            SessionMachineState::LoggingIn => SessionState::LoggingIn,
            SessionMachineState::AwaitingRegistrationConfirmation => {
                SessionState::AwaitingRegistrationConfirmation
            }
            SessionMachineState::AwaitingPasswordResetConfirmation => {
                SessionState::AwaitingPasswordResetConfirmation
            }
            SessionMachineState::AwaitingNewPassword => SessionState::AwaitingNewPassword,
            SessionMachineState::Authenticated => SessionState::Authenticated,
            SessionMachineState::Refreshing => SessionState::Refreshing,
            SessionMachineState::LoggingOut => SessionState::LoggingOut,
        }
    }
}

/// Configuration for retry behavior during token refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Payload for session state change events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
