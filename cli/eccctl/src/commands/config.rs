//! Config commands (saved API endpoint and polling defaults).

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::config::{Config, PollSettings};
use crate::output::{print_single, print_success, OutputFormat};

use super::CommandContext;

/// Show or change saved CLI configuration.
#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommand {
    /// Show the effective configuration.
    Show,

    /// Save the API endpoint.
    SetUrl(SetUrlArgs),

    /// Save polling defaults used by `instances toggle`.
    SetPoll(SetPollArgs),

    /// Restore the default configuration.
    Reset,
}

#[derive(Debug, Args)]
struct SetUrlArgs {
    /// API endpoint URL (e.g. https://console.example.com/api).
    url: String,
}

#[derive(Debug, Args)]
struct SetPollArgs {
    /// Seconds between status polls.
    #[arg(long)]
    interval: Option<u64>,

    /// Polls before giving up (0 for no limit).
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds before giving up (0 for no limit).
    #[arg(long)]
    timeout: Option<u64>,

    /// Consecutive failed polls tolerated.
    #[arg(long)]
    max_failures: Option<u32>,

    /// Timeout on each API call, in seconds.
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Re-read the instance state right before toggling.
    #[arg(long)]
    authoritative: Option<bool>,
}

impl SetPollArgs {
    fn apply(&self, settings: &mut PollSettings) {
        if let Some(interval) = self.interval {
            settings.interval_secs = interval;
        }
        if let Some(max_attempts) = self.max_attempts {
            settings.max_attempts = (max_attempts > 0).then_some(max_attempts);
        }
        if let Some(timeout) = self.timeout {
            settings.max_duration_secs = (timeout > 0).then_some(timeout);
        }
        if let Some(max_failures) = self.max_failures {
            settings.max_consecutive_failures = max_failures;
        }
        if let Some(request_timeout) = self.request_timeout {
            settings.request_timeout_secs = request_timeout;
        }
        if let Some(authoritative) = self.authoritative {
            settings.authoritative = authoritative;
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigView<'a> {
    api_url: &'a str,
    poll: &'a PollSettings,
}

impl ConfigCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ConfigSubcommand::Show => show(ctx).await,
            ConfigSubcommand::SetUrl(args) => set_url(ctx, args).await,
            ConfigSubcommand::SetPoll(args) => set_poll(ctx, args).await,
            ConfigSubcommand::Reset => reset(ctx).await,
        }
    }
}

fn limit(value: Option<impl std::fmt::Display>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

async fn show(ctx: CommandContext) -> Result<()> {
    let view = ConfigView {
        api_url: ctx.config.api_url(),
        poll: &ctx.config.poll,
    };

    match ctx.format {
        OutputFormat::Json => print_single(&view),
        OutputFormat::Table => {
            let poll = view.poll;
            println!("api_url: {}", view.api_url);
            println!("poll.interval_secs: {}", poll.interval_secs);
            println!("poll.max_attempts: {}", limit(poll.max_attempts));
            println!("poll.max_duration_secs: {}", limit(poll.max_duration_secs));
            println!(
                "poll.max_consecutive_failures: {}",
                poll.max_consecutive_failures
            );
            println!("poll.request_timeout_secs: {}", poll.request_timeout_secs);
            println!("poll.authoritative: {}", poll.authoritative);
        }
    }

    Ok(())
}

async fn set_url(ctx: CommandContext, args: SetUrlArgs) -> Result<()> {
    let url = args.url.trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("API URL must start with http:// or https://");
    }

    // Edit the file on disk so a --api-url override is not persisted by accident.
    let mut config = Config::load()?;
    config.api_url = url.to_string();
    config.save()?;

    match ctx.format {
        OutputFormat::Json => print_single(&serde_json::json!({ "api_url": url })),
        OutputFormat::Table => print_success(&format!("API URL set to {}", url)),
    }

    Ok(())
}

async fn set_poll(ctx: CommandContext, args: SetPollArgs) -> Result<()> {
    let mut config = Config::load()?;
    args.apply(&mut config.poll);
    config.poll.to_policy().validate()?;
    config.save()?;

    match ctx.format {
        OutputFormat::Json => print_single(&config.poll),
        OutputFormat::Table => print_success("Saved polling defaults"),
    }

    Ok(())
}

async fn reset(ctx: CommandContext) -> Result<()> {
    Config::default().save()?;

    match ctx.format {
        OutputFormat::Json => print_single(&serde_json::json!({ "ok": true })),
        OutputFormat::Table => print_success("Restored default configuration"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SetPollArgs {
        SetPollArgs {
            interval: None,
            max_attempts: None,
            timeout: None,
            max_failures: None,
            request_timeout: None,
            authoritative: None,
        }
    }

    #[test]
    fn test_set_poll_only_touches_given_fields() {
        let mut settings = PollSettings::default();
        SetPollArgs {
            interval: Some(2),
            ..args()
        }
        .apply(&mut settings);

        assert_eq!(settings.interval_secs, 2);
        assert_eq!(
            settings.max_attempts,
            PollSettings::default().max_attempts
        );
    }

    #[test]
    fn test_zero_limits_disable() {
        let mut settings = PollSettings::default();
        SetPollArgs {
            max_attempts: Some(0),
            timeout: Some(0),
            authoritative: Some(true),
            ..args()
        }
        .apply(&mut settings);

        assert_eq!(settings.max_attempts, None);
        assert_eq!(settings.max_duration_secs, None);
        assert!(settings.authoritative);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut settings = PollSettings::default();
        SetPollArgs {
            interval: Some(0),
            ..args()
        }
        .apply(&mut settings);

        assert!(settings.to_policy().validate().is_err());
    }

    #[test]
    fn test_huge_values_do_not_break_the_policy() {
        let mut settings = PollSettings::default();
        SetPollArgs {
            timeout: Some(u64::MAX),
            ..args()
        }
        .apply(&mut settings);
        assert!(settings.to_policy().validate().is_ok());

        SetPollArgs {
            interval: Some(u64::MAX),
            ..args()
        }
        .apply(&mut settings);
        assert!(matches!(
            settings.to_policy().validate(),
            Err(ecc_reconcile::PolicyError::IntervalTooLong { .. })
        ));
    }

    #[test]
    fn test_limit_display() {
        assert_eq!(limit(Some(60)), "60");
        assert_eq!(limit(None::<u32>), "none");
    }
}
