//! Session lifecycle for the Crema client.
//!
//! [`SessionManager`] signs users in and out, runs the registration and
//! password-reset passcode flows, and keeps tokens fresh. It owns the
//! account pipelines and hands out authorized pipelines for business
//! endpoints, which refresh once on 401 and sign out on an expired session.

mod api;
mod auth_fsm;
mod cell;
mod flow;
mod password;
mod session;
mod settings;

pub use api::{OtpVerification, UserProfile};
pub use auth_fsm::{
    session_machine, RefreshConfig, SessionMachineInput, SessionMachineState, SessionState,
    SessionStateChanged,
};
pub use cell::SessionCell;
pub use flow::PendingFlow;
pub use password::{
    unmet_rules, validate_password, PasswordRule, MIN_PASSWORD_LENGTH, PASSWORD_SYMBOLS,
};
pub use session::{Navigator, SessionManager, SessionManagerConfig, StateCallback};
pub use settings::ClientSettings;
