//! Instance commands (registry management and power toggling).

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};
use ecc_reconcile::{
    Outcome, PollPolicy, Poller, PowerState, StatusProvider, TransitionHandle, WatchEvent,
};
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tokio::sync::broadcast;

use crate::error::CliError;
use crate::output::{
    print_info, print_output, print_receipt, print_receipt_no_resource, print_single,
    print_success, print_warning, OutputFormat, Receipt, ReceiptNextStep, ReceiptNoResource,
};
use crate::provider::{my_instances, ApiStatusProvider, OwnedInstance};

use super::CommandContext;

/// Instance commands.
#[derive(Debug, Args)]
pub struct InstancesCommand {
    #[command(subcommand)]
    command: InstancesSubcommand,
}

#[derive(Debug, Subcommand)]
enum InstancesSubcommand {
    /// List all registered instances (administrators).
    List,

    /// Register an instance (administrators).
    Add(InstanceIdArgs),

    /// Unregister an instance (administrators).
    Remove(InstanceIdArgs),

    /// List the instances you may toggle, with their state.
    Mine,

    /// Start a stopped instance or stop a running one, and wait for it.
    Toggle(ToggleArgs),
}

#[derive(Debug, Args)]
struct InstanceIdArgs {
    /// Instance ID.
    id: String,
}

#[derive(Debug, Args)]
struct ToggleArgs {
    /// Instance ID.
    id: String,

    /// Send the request and return without waiting.
    #[arg(long)]
    no_wait: bool,

    /// Seconds between status polls.
    #[arg(long)]
    interval: Option<u64>,

    /// Polls before giving up (0 for no limit).
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds before giving up (0 for no limit).
    #[arg(long)]
    timeout: Option<u64>,

    /// Re-read the state right before toggling instead of trusting the listing.
    #[arg(long)]
    authoritative: bool,
}

impl ToggleArgs {
    /// Apply command-line overrides to the configured policy.
    fn policy(&self, base: PollPolicy) -> PollPolicy {
        let mut policy = base;
        if let Some(secs) = self.interval {
            policy = policy.with_interval(Duration::from_secs(secs));
        }
        if let Some(attempts) = self.max_attempts {
            policy = policy.with_max_attempts((attempts > 0).then_some(attempts));
        }
        if let Some(secs) = self.timeout {
            policy = policy.with_max_duration((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if self.authoritative {
            policy = policy.with_target_resolution(ecc_reconcile::TargetResolution::Authoritative);
        }
        policy
    }
}

impl InstancesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            InstancesSubcommand::List => list_instances(ctx).await,
            InstancesSubcommand::Add(args) => add_instance(ctx, args).await,
            InstancesSubcommand::Remove(args) => remove_instance(ctx, args).await,
            InstancesSubcommand::Mine => list_my_instances(ctx).await,
            InstancesSubcommand::Toggle(args) => toggle_instance(ctx, args).await,
        }
    }
}

/// Registered instance.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct InstanceRecord {
    #[tabled(rename = "ID")]
    id: String,
}

/// Row for the my-instances table.
#[derive(Debug, Clone, Serialize, Tabled)]
struct OwnedInstanceRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "State")]
    state: String,
}

impl From<OwnedInstance> for OwnedInstanceRow {
    fn from(instance: OwnedInstance) -> Self {
        Self {
            id: instance.id,
            state: instance.state,
        }
    }
}

/// Result of a toggle, for JSON output.
#[derive(Debug, Serialize)]
struct ToggleReport {
    id: String,
    previous_state: PowerState,
    target_state: PowerState,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_state: Option<PowerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ToggleReport {
    fn new(id: &str, previous: PowerState, handle: &TransitionHandle, outcome: &Outcome) -> Self {
        let (label, final_state, detail) = match outcome {
            Outcome::Converged(state) => ("converged", Some(*state), None),
            Outcome::Cancelled => ("cancelled", None, None),
            Outcome::Failed(err) => ("failed", None, Some(err.to_string())),
            Outcome::TimedOut { .. } => ("timed_out", None, Some(outcome.to_string())),
        };
        Self {
            id: id.to_string(),
            previous_state: previous,
            target_state: handle.target(),
            outcome: label,
            final_state,
            detail,
        }
    }
}

/// List all registered instances.
async fn list_instances(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let instances: Vec<InstanceRecord> = client.get("/instances").await?;

    print_output(&instances, ctx.format);
    Ok(())
}

/// Register an instance.
async fn add_instance(ctx: CommandContext, args: InstanceIdArgs) -> Result<()> {
    let id = args.id.trim();
    if id.is_empty() {
        anyhow::bail!("Instance ID cannot be empty");
    }

    let client = ctx.client()?;
    let record = InstanceRecord { id: id.to_string() };
    client
        .post_unit("/instances", &record)
        .await
        .map_err(|e| match e {
            CliError::Api { status: 403, .. } => CliError::api(
                403,
                "Only administrators can register instances",
            ),
            other => other,
        })?;

    let next = [ReceiptNextStep {
        label: "Assign",
        cmd: format!("ecc users assign <user-id> {}", record.id),
    }];
    print_receipt(
        ctx.format,
        Receipt {
            message: format!("Registered instance {}", record.id),
            kind: "instances.add",
            resource_key: "instance",
            resource: &record,
            next: &next,
        },
    );
    Ok(())
}

/// Unregister an instance.
async fn remove_instance(ctx: CommandContext, args: InstanceIdArgs) -> Result<()> {
    let client = ctx.client()?;
    client
        .delete(&format!("/instances/{}", args.id))
        .await
        .map_err(|e| match e {
            CliError::Api { status: 404, .. } => {
                CliError::NotFound(format!("Instance '{}' not found", args.id))
            }
            other => other,
        })?;

    print_receipt_no_resource(
        ctx.format,
        ReceiptNoResource {
            message: format!("Removed instance {}", args.id),
            kind: "instances.remove",
            ids: serde_json::json!({ "instance_id": args.id }),
            next: &[],
        },
    );
    Ok(())
}

/// List the instances the current user may toggle.
async fn list_my_instances(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let rows: Vec<OwnedInstanceRow> = my_instances(&client)
        .await?
        .into_iter()
        .map(OwnedInstanceRow::from)
        .collect();

    print_output(&rows, ctx.format);
    Ok(())
}

/// Toggle an instance and follow it until the new state is observed.
async fn toggle_instance(ctx: CommandContext, args: ToggleArgs) -> Result<()> {
    let id = args.id.trim();
    if id.is_empty() {
        anyhow::bail!("Instance ID cannot be empty");
    }

    let provider = ApiStatusProvider::new(ctx.client()?);
    let policy = args.policy(ctx.config.poll.to_policy());
    let poller = Poller::new(provider, policy)?;

    if args.no_wait {
        poller.request_only(id).await?;
        match ctx.format {
            OutputFormat::Json => {
                print_single(&serde_json::json!({ "id": id, "requested": true }))
            }
            OutputFormat::Table => print_success(&format!(
                "Toggle requested for {}. Check progress with `ecc instances mine`.",
                id
            )),
        }
        return Ok(());
    }

    // The listing is the caller's view of the state, as the console shows it.
    let current = poller.poll_once(id).await?;
    let mut events = poller.subscribe();
    let handle = poller.request_transition(id, current).await?;

    if ctx.format == OutputFormat::Table {
        print_info(&format!(
            "Toggling {}: {} -> {} (Ctrl-C stops waiting)",
            id,
            current,
            handle.target()
        ));
    }

    let outcome = follow(&poller, &handle, &mut events, ctx.format).await;
    let report = ToggleReport::new(id, current, &handle, &outcome);

    if ctx.format == OutputFormat::Json {
        print_single(&report);
    }

    match outcome {
        Outcome::Converged(state) => {
            if ctx.format == OutputFormat::Table {
                print_success(&format!("{} is now {}.", id, state));
            }
            Ok(())
        }
        Outcome::Cancelled => {
            if ctx.format == OutputFormat::Table {
                print_warning("Stopped waiting. The toggle request was already sent.");
            }
            Err(anyhow::anyhow!("Toggle of {} was not confirmed", id))
        }
        Outcome::Failed(err) => Err(anyhow::anyhow!(
            "Lost track of {}: {}",
            id,
            err.source
        )),
        Outcome::TimedOut { attempts, elapsed } => Err(anyhow::anyhow!(
            "{} did not reach {} after {} polls ({}s)",
            id,
            handle.target(),
            attempts,
            elapsed.as_secs()
        )),
    }
}

/// Wait for the outcome, reporting progress and cancelling on Ctrl-C.
async fn follow<P: StatusProvider>(
    poller: &Poller<P>,
    handle: &TransitionHandle,
    events: &mut broadcast::Receiver<WatchEvent>,
    format: OutputFormat,
) -> Outcome {
    let mut interrupted = false;

    loop {
        tokio::select! {
            outcome = handle.outcome() => return outcome,
            event = events.recv() => {
                if let Ok(event) = event {
                    if format == OutputFormat::Table && event.resource_id() == handle.resource_id() {
                        report_progress(&event);
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if signal.is_ok() {
                    poller.cancel(handle).await;
                }
            }
        }
    }
}

fn report_progress(event: &WatchEvent) {
    match event {
        WatchEvent::Observed { attempt, state, .. } => {
            print_info(&format!("poll {}: {}", attempt, state));
        }
        WatchEvent::PollFailed {
            attempt,
            consecutive_failures,
            error,
            ..
        } => {
            print_warning(&format!(
                "poll {} failed ({} in a row): {}",
                attempt, consecutive_failures, error.source
            ));
        }
        WatchEvent::Requesting { .. } | WatchEvent::Polling { .. } | WatchEvent::Finished { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecc_reconcile::{MockProvider, TargetResolution};

    fn toggle_args() -> ToggleArgs {
        ToggleArgs {
            id: "i-0abc".to_string(),
            no_wait: false,
            interval: None,
            max_attempts: None,
            timeout: None,
            authoritative: false,
        }
    }

    #[test]
    fn test_policy_without_overrides_is_unchanged() {
        let base = PollPolicy::default();
        assert_eq!(toggle_args().policy(base.clone()), base);
    }

    #[test]
    fn test_policy_overrides() {
        let args = ToggleArgs {
            interval: Some(2),
            max_attempts: Some(10),
            timeout: Some(60),
            authoritative: true,
            ..toggle_args()
        };
        let policy = args.policy(PollPolicy::default());
        assert_eq!(policy.interval, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(policy.max_duration, Some(Duration::from_secs(60)));
        assert_eq!(policy.target_resolution, TargetResolution::Authoritative);
    }

    #[test]
    fn test_zero_overrides_mean_no_limit() {
        let args = ToggleArgs {
            max_attempts: Some(0),
            timeout: Some(0),
            ..toggle_args()
        };
        let policy = args.policy(PollPolicy::default());
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.max_duration, None);
        assert!(policy.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_returns_outcome() {
        let provider = MockProvider::new(PowerState::Stopped);
        provider
            .script_states([PowerState::Running, PowerState::Stopped])
            .await;
        let poller = Poller::new(provider, PollPolicy::default()).unwrap();
        let mut events = poller.subscribe();

        let handle = poller
            .request_transition("i-0abc", PowerState::Running)
            .await
            .unwrap();
        let outcome = follow(&poller, &handle, &mut events, OutputFormat::Json).await;
        assert_eq!(outcome, Outcome::Converged(PowerState::Stopped));

        let report = ToggleReport::new("i-0abc", PowerState::Running, &handle, &outcome);
        assert_eq!(report.outcome, "converged");
        assert_eq!(report.target_state, PowerState::Stopped);
        assert_eq!(report.final_state, Some(PowerState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_report_has_detail() {
        let poller = Poller::new(
            MockProvider::new(PowerState::Stopped),
            PollPolicy::default().with_max_attempts(Some(3)),
        )
        .unwrap();
        let handle = poller
            .request_transition("i-0abc", PowerState::Stopped)
            .await
            .unwrap();
        let outcome = handle.outcome().await;

        let report = ToggleReport::new("i-0abc", PowerState::Stopped, &handle, &outcome);
        assert_eq!(report.outcome, "timed_out");
        assert_eq!(report.final_state, None);
        assert_eq!(
            report.detail.as_deref(),
            Some("timed out after 3 polls (15s)")
        );
    }
}
