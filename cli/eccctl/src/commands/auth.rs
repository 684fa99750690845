//! Authentication commands.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::config::Credentials;
use crate::output::{print_info, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Authentication commands.
#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    /// Log in with email and password.
    Login(LoginArgs),

    /// Log out and forget the saved session.
    Logout,

    /// Create a new account.
    Register(RegisterArgs),

    /// Show current authentication status.
    Status,

    /// Show who you are logged in as.
    Whoami,
}

#[derive(Debug, Args)]
struct LoginArgs {
    /// Account email.
    #[arg(long, env = "ECC_EMAIL")]
    email: String,

    /// Password (read from stdin when omitted).
    #[arg(long, env = "ECC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, Args)]
struct RegisterArgs {
    /// Account email.
    #[arg(long)]
    email: String,

    /// Password (read from stdin when omitted).
    #[arg(long, env = "ECC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// The current user, as returned by `/users/me`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct Me {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub instances: Vec<String>,
}

impl AuthCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            AuthSubcommand::Login(args) => login(ctx, args).await,
            AuthSubcommand::Logout => logout(ctx).await,
            AuthSubcommand::Register(args) => register(ctx, args).await,
            AuthSubcommand::Status => status(ctx).await,
            AuthSubcommand::Whoami => whoami(ctx).await,
        }
    }
}

/// Use the given password or read one line from stdin.
fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password)
}

/// Log in to the console.
async fn login(ctx: CommandContext, args: LoginArgs) -> Result<()> {
    let password = password_or_prompt(args.password)?;

    let anonymous = ApiClient::new(&ctx.config, None)?;
    let cookie = anonymous.login(&args.email, &password).await?;

    let mut creds = Credentials::new(cookie);

    // Validate the session and fetch identity.
    let client = ApiClient::new(&ctx.config, Some(&creds))?;
    let me: Me = client.get("/users/me").await?;
    creds.email = Some(me.email);
    creds.user_id = Some(me.id);
    creds.is_superuser = me.is_superuser;

    creds.save()?;

    print_success(&format!("Logged in as {}.", args.email));
    if creds.is_superuser {
        print_info("This account can manage instances and users.");
    }
    Ok(())
}

/// Log out from the console.
async fn logout(ctx: CommandContext) -> Result<()> {
    if ctx.credentials.is_some() {
        // The local session is dropped even if the server call fails.
        if let Err(e) = ctx.client()?.post_unit("/logout/", &serde_json::json!({})).await {
            tracing::warn!(error = %e, "Server-side logout failed");
        }
    }

    Credentials::delete()?;
    print_success("Logged out successfully.");
    Ok(())
}

/// Register a new account.
async fn register(ctx: CommandContext, args: RegisterArgs) -> Result<()> {
    let password = password_or_prompt(args.password)?;

    let client = ApiClient::new(&ctx.config, None)?;
    let me: Me = client
        .post(
            "/register/",
            &RegisterRequest {
                email: &args.email,
                password: &password,
            },
        )
        .await?;

    match ctx.format {
        OutputFormat::Json => print_single(&me),
        OutputFormat::Table => {
            print_success(&format!("Registered {} ({}).", me.email, me.id));
            print_info(&format!(
                "Log in with: ecc auth login --email {}",
                me.email
            ));
        }
    }
    Ok(())
}

/// Show authentication status.
async fn status(ctx: CommandContext) -> Result<()> {
    match ctx.credentials {
        Some(creds) => {
            println!("{} Authenticated", "Status:".green().bold());

            if let Some(email) = &creds.email {
                println!("  Email: {}", email);
            }

            if let Some(user_id) = &creds.user_id {
                println!("  User ID: {}", user_id);
            }

            if creds.is_superuser {
                println!("  Role: administrator");
            }

            println!("  Since: {}", creds.logged_in_at);
        }
        None => {
            println!("{} Not authenticated", "Status:".red().bold());
            println!("\nRun {} to log in.", "ecc auth login".cyan());
        }
    }

    Ok(())
}

/// Show who you are logged in as.
async fn whoami(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let me: Me = client.get("/users/me").await?;

    match ctx.format {
        OutputFormat::Json => print_single(&me),
        OutputFormat::Table => {
            let role = if me.is_superuser { " (administrator)" } else { "" };
            println!("{}{}", me.email, role);
        }
    };

    Ok(())
}
