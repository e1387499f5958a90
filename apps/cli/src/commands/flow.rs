//! Registration and password-reset commands.
//!
//! Each flow spans several invocations; the open flow is saved after
//! every step and resumed by the next one.

use super::{prompt_new_password, prompt_or, Client};
use crate::output::{self, OutputFormat};
use anyhow::Result;
use crema_session::SessionState;

/// Create an account.
pub async fn register(
    client: &Client,
    email: Option<String>,
    name: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let email = prompt_or(email, "Email")?;
    let name = prompt_or(name, "Display name")?;
    let password = prompt_new_password()?;

    client.manager.register(&email, &password, &name).await?;
    client.save_pending_flow()?;
    output::print_success(
        &format!(
            "A passcode was sent to {}. Run 'crema verify-login <code>' to confirm and sign in",
            email.trim()
        ),
        format,
    );
    Ok(())
}

/// Confirm the emailed passcode of the open flow.
pub async fn verify(client: &Client, code: &str, format: &OutputFormat) -> Result<()> {
    let state = client.manager.confirm_one_time_passcode(code).await?;
    client.save_pending_flow()?;

    let message = if state == SessionState::AwaitingNewPassword {
        "Passcode accepted. Run 'crema reset-password' to choose a new password"
    } else {
        "Account confirmed. Run 'crema login' to sign in"
    };
    output::print_success(message, format);
    Ok(())
}

/// Confirm the registration passcode and sign in.
pub async fn verify_login(client: &Client, code: &str, format: &OutputFormat) -> Result<()> {
    let record = client
        .manager
        .confirm_one_time_passcode_and_login(code)
        .await?;
    client.save_pending_flow()?;
    output::print_success(&format!("Logged in as {}", record.email), format);
    Ok(())
}

/// Start a password reset.
pub async fn forgot_password(
    client: &Client,
    email: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let email = prompt_or(email, "Email")?;

    client.manager.request_password_reset(&email).await?;
    client.save_pending_flow()?;
    output::print_success(
        &format!(
            "A passcode was sent to {}. Run 'crema verify <code>' to continue",
            email.trim()
        ),
        format,
    );
    Ok(())
}

/// Choose a new password after the reset passcode was confirmed.
pub async fn reset_password(client: &Client, format: &OutputFormat) -> Result<()> {
    if client.manager.state() != SessionState::AwaitingNewPassword {
        anyhow::bail!("No password reset is waiting. Run 'crema forgot-password' first");
    }

    let password = prompt_new_password()?;
    client.manager.complete_password_reset(&password).await?;
    client.save_pending_flow()?;
    output::print_success("Password reset. Run 'crema login' to sign in", format);
    Ok(())
}
