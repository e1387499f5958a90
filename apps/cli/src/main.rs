//! Crema CLI - sign in and manage the Crema account from a terminal.

mod commands;
mod output;
mod presenter;

use clap::{Parser, Subcommand};
use crema_config_and_utils::{init_logging, Config, Paths};
use crema_exceptions::AppException;
use tracing::debug;

/// Crema CLI - Sign in, register and manage your session.
#[derive(Parser)]
#[command(name = "crema")]
#[command(about = "Crema CLI for authentication and session management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with email and password
    Login {
        /// Account email
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Create an account
    Register {
        /// Account email
        #[arg(short, long)]
        email: Option<String>,
        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Confirm the emailed passcode of a registration or password reset
    Verify {
        /// Passcode from the email
        code: String,
    },

    /// Confirm the registration passcode and sign in
    VerifyLogin {
        /// Passcode from the email
        code: String,
    },

    /// Request a password reset passcode
    ForgotPassword {
        /// Account email
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Choose a new password after confirming the reset passcode
    ResetPassword,

    /// Change the password of the signed-in account
    ChangePassword,

    /// Refresh the access token
    Refresh,

    /// Show the signed-in user's profile
    Profile,

    /// Logout and clear session
    Logout,

    /// Check authentication status
    Status,
}

async fn run(cli: &Cli, client: &commands::Client) -> anyhow::Result<()> {
    let format = &cli.format;
    match &cli.command {
        Commands::Login { email } => commands::login(client, email.clone(), format).await,
        Commands::Register { email, name } => {
            commands::register(client, email.clone(), name.clone(), format).await
        }
        Commands::Verify { code } => commands::verify(client, code, format).await,
        Commands::VerifyLogin { code } => commands::verify_login(client, code, format).await,
        Commands::ForgotPassword { email } => {
            commands::forgot_password(client, email.clone(), format).await
        }
        Commands::ResetPassword => commands::reset_password(client, format).await,
        Commands::ChangePassword => commands::change_password(client, format).await,
        Commands::Refresh => commands::refresh(client, format).await,
        Commands::Profile => commands::profile(client, format).await,
        Commands::Logout => commands::logout(client, format).await,
        Commands::Status => commands::status(client, format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (paths, config) = match Paths::new().and_then(|paths| {
        let config = Config::load(&paths)?;
        Ok((paths, config))
    }) {
        Ok(loaded) => loaded,
        Err(e) => {
            output::print_error(&e.to_string(), &cli.format);
            std::process::exit(1);
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, &paths, false);
    debug!(api = %config.api_base_url, "Configuration loaded");

    let client = match commands::Client::connect(paths, &config) {
        Ok(client) => client,
        Err(e) => {
            output::print_error(&format!("{:#}", e), &cli.format);
            std::process::exit(1);
        }
    };

    let result = run(&cli, &client).await;

    // Anything the session reported is shown once, here.
    let presented = client.dispatcher.dispatch_pending();

    if let Err(e) = result {
        let already_shown = match (e.downcast_ref::<AppException>(), &presented) {
            (Some(raised), Some(shown)) => raised.id() == shown.id(),
            _ => false,
        };
        if !already_shown {
            output::print_error(&format!("{:#}", e), &cli.format);
        }
        std::process::exit(1);
    }
}
