//! CLI commands.

mod auth;
mod config;
mod instances;
mod users;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::config::{Config, Credentials};
use crate::output::OutputFormat;

/// ecc - manage and power-toggle cloud instances.
#[derive(Debug, Parser)]
#[command(name = "ecc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// API endpoint, overriding the saved config.
    #[arg(long, global = true, env = "ECC_API_URL")]
    api_url: Option<String>,

    /// Emit logs as JSON (filter with ECC_LOG, default "warn").
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in, log out, and inspect the session.
    Auth(auth::AuthCommand),

    /// Manage instances and toggle their power state.
    Instances(instances::InstancesCommand),

    /// Manage users and their instance assignments.
    Users(users::UsersCommand),

    /// Show or change saved CLI configuration.
    Config(config::ConfigCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = OutputFormat::parse(&self.format);

        let mut config = Config::load()?;
        if let Some(api_url) = self.api_url {
            config.api_url = api_url;
        }
        let credentials = Credentials::load()?;

        let ctx = CommandContext {
            config,
            credentials,
            format,
        };

        match self.command {
            Commands::Auth(cmd) => cmd.run(ctx).await,
            Commands::Instances(cmd) => cmd.run(ctx).await,
            Commands::Users(cmd) => cmd.run(ctx).await,
            Commands::Config(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("ecc {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub credentials: Option<Credentials>,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Get an API client carrying the saved session, if any.
    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.config, self.credentials.as_ref())
    }
}
