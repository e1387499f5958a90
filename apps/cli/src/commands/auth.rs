//! Authentication commands.

use super::{prompt_new_password, prompt_or, prompt_password, Client, SessionView};
use crate::output::{self, OutputFormat};
use anyhow::Result;

/// Login with email and password.
pub async fn login(client: &Client, email: Option<String>, format: &OutputFormat) -> Result<()> {
    if client.manager.is_authenticated() {
        let view = SessionView::of(&client.manager);
        let email = view.email.as_deref().unwrap_or("unknown");
        output::print_success(&format!("Already logged in as {}", email), format);
        return Ok(());
    }

    let email = prompt_or(email, "Email")?;
    if email.is_empty() {
        anyhow::bail!("Email is required");
    }

    // Prompt for password (hidden)
    let password = prompt_password("Password")?;
    if password.is_empty() {
        anyhow::bail!("Password is required");
    }

    let record = client.manager.login(&email, &password).await?;
    client.save_pending_flow()?;
    output::print_success(&format!("Logged in as {}", record.email), format);
    Ok(())
}

/// Logout and clear session.
pub async fn logout(client: &Client, format: &OutputFormat) -> Result<()> {
    if !client.manager.is_authenticated() {
        output::print_success("Not logged in", format);
        return Ok(());
    }

    client.manager.logout().await;
    client.save_pending_flow()?;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Check authentication status.
pub async fn status(client: &Client, format: &OutputFormat) -> Result<()> {
    output::print(&SessionView::of(&client.manager), format);
    Ok(())
}

/// Refresh the access token now.
pub async fn refresh(client: &Client, format: &OutputFormat) -> Result<()> {
    let token = client.manager.refresh().await?;
    output::print_success(
        &format!(
            "Session refreshed, access token valid until {}",
            token.access_expiry.to_rfc3339()
        ),
        format,
    );
    Ok(())
}

/// Fetch and show the signed-in user's profile.
pub async fn profile(client: &Client, format: &OutputFormat) -> Result<()> {
    let profile = client.manager.fetch_profile().await?;

    match format {
        OutputFormat::Text => {
            println!("{}", output::row("User ID", &profile.user_id));
            println!("{}", output::row("Email", &profile.email));
            println!("{}", output::row("Name", &profile.display_name));
            let roles: Vec<&str> = profile.roles.iter().map(String::as_str).collect();
            println!("{}", output::row("Roles", &roles.join(", ")));
            println!(
                "{}",
                output::row("Premium", if profile.is_premium { "yes" } else { "no" })
            );
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profile)?),
    }
    Ok(())
}

/// Change the signed-in user's password.
pub async fn change_password(client: &Client, format: &OutputFormat) -> Result<()> {
    if !client.manager.is_authenticated() {
        anyhow::bail!("Not logged in. Run 'crema login' first");
    }

    let current = prompt_password("Current password")?;
    let new_password = prompt_new_password()?;

    client
        .manager
        .change_password(&current, &new_password)
        .await?;
    output::print_success("Password changed", format);
    Ok(())
}
