//! Delivery of exceptions to the presentation layer.

use crate::exception::AppException;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

/// Shows a titled message to the user.
pub trait PresentationSink: Send + Sync {
    fn present(&self, title: &str, message: &str);
}

#[derive(Default)]
struct DispatchState {
    pending: Option<AppException>,
    last_delivered: Option<Uuid>,
}

/// Single-slot exception relay.
///
/// Holds at most one undelivered exception. A newer report replaces an
/// older undelivered one. Only the pending exception and the most recently
/// delivered one are remembered, so re-reporting either is a no-op while an
/// instance delivered before that can be presented again.
pub struct ExceptionDispatcher {
    sink: Arc<dyn PresentationSink>,
    state: Mutex<DispatchState>,
    notify: Notify,
}

impl ExceptionDispatcher {
    pub fn new(sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(DispatchState::default()),
            notify: Notify::new(),
        }
    }

    /// Queue an exception for presentation.
    ///
    /// Returns false when this exact exception is pending or was the last
    /// one delivered.
    pub fn report(&self, exception: &AppException) -> bool {
        let replaced = {
            let mut state = self.state.lock();
            let id = exception.id();
            if state.last_delivered == Some(id)
                || state.pending.as_ref().map(AppException::id) == Some(id)
            {
                return false;
            }
            state.pending.replace(exception.clone())
        };

        if let Some(previous) = replaced {
            debug!(
                dropped = %previous.id(),
                kind = previous.kind().name(),
                "undelivered exception superseded"
            );
        }

        warn!(
            exception_id = %exception.id(),
            kind = exception.kind().name(),
            message = exception.message(),
            "exception reported"
        );
        self.notify.notify_one();
        true
    }

    /// The exception awaiting delivery, if any.
    pub fn pending(&self) -> Option<AppException> {
        self.state.lock().pending.clone()
    }

    /// Present the pending exception, if any, and clear the slot.
    pub fn dispatch_pending(&self) -> Option<AppException> {
        let exception = {
            let mut state = self.state.lock();
            let exception = state.pending.take()?;
            state.last_delivered = Some(exception.id());
            exception
        };

        let (title, message) = exception.presentation();
        self.sink.present(title, message);
        Some(exception)
    }

    /// Deliver exceptions as they are reported, until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.notify.notified().await;
            self.dispatch_pending();
        }
    }
}
