//! Failure taxonomy and presentation dispatch for the Crema client.
//!
//! Every failure that leaves the session/request subsystem is an
//! [`AppException`] with exactly one [`ExceptionKind`]. The
//! [`ExceptionDispatcher`] forwards each one, once, to a
//! [`PresentationSink`].

mod dispatcher;
mod exception;

pub use dispatcher::{ExceptionDispatcher, PresentationSink};
pub use exception::{ApiResult, AppException, ExceptionKind};
