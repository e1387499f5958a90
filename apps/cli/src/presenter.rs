//! Terminal adapters for the session's presentation and navigation hooks.

use crema_exceptions::PresentationSink;
use crema_session::Navigator;

/// Prints reported exceptions to stderr.
pub struct StderrPresenter;

impl PresentationSink for StderrPresenter {
    fn present(&self, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }
}

/// There is no login screen in a terminal; point at the command instead.
pub struct CliNavigator;

impl Navigator for CliNavigator {
    fn show_login(&self) {
        eprintln!("You are signed out. Run 'crema login' to sign in again.");
    }
}
