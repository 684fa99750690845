//! User commands (accounts and instance assignment).

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::error::CliError;
use crate::output::{
    print_output, print_receipt, print_receipt_no_resource, print_single, OutputFormat, Receipt,
    ReceiptNextStep, ReceiptNoResource,
};

use super::CommandContext;

/// User commands.
#[derive(Debug, Args)]
pub struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Debug, Subcommand)]
enum UsersSubcommand {
    /// List users and their instances (administrators).
    List,

    /// Get user details.
    Get(UserIdArgs),

    /// Allow a user to toggle an instance.
    Assign(AssignmentArgs),

    /// Revoke a user's access to an instance.
    Unassign(AssignmentArgs),

    /// Delete a user.
    Delete(UserIdArgs),
}

#[derive(Debug, Args)]
struct UserIdArgs {
    /// User ID.
    user: String,
}

#[derive(Debug, Args)]
struct AssignmentArgs {
    /// User ID.
    user: String,

    /// Instance ID.
    instance: String,
}

impl UsersCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            UsersSubcommand::List => list_users(ctx).await,
            UsersSubcommand::Get(args) => get_user(ctx, args).await,
            UsersSubcommand::Assign(args) => assign(ctx, args).await,
            UsersSubcommand::Unassign(args) => unassign(ctx, args).await,
            UsersSubcommand::Delete(args) => delete_user(ctx, args).await,
        }
    }
}

/// User response from API.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct UserResponse {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Email")]
    email: String,

    #[tabled(rename = "Instances", display = "display_instances")]
    #[serde(default)]
    instances: Vec<String>,
}

fn display_instances(instances: &[String]) -> String {
    if instances.is_empty() {
        "-".to_string()
    } else {
        instances.join(", ")
    }
}

#[derive(Debug, Serialize)]
struct UpdateInstancesRequest<'a> {
    id: &'a str,
    instances: &'a [String],
}

/// Append `instance` unless it is already present; order is kept.
fn with_instance(instances: &[String], instance: &str) -> Vec<String> {
    let mut updated = Vec::with_capacity(instances.len() + 1);
    for existing in instances {
        if !updated.contains(existing) {
            updated.push(existing.clone());
        }
    }
    if !updated.iter().any(|existing| existing == instance) {
        updated.push(instance.to_string());
    }
    updated
}

/// Remove every occurrence of `instance`.
fn without_instance(instances: &[String], instance: &str) -> Vec<String> {
    instances
        .iter()
        .filter(|existing| existing.as_str() != instance)
        .cloned()
        .collect()
}

async fn fetch_user(client: &ApiClient, user: &str) -> Result<UserResponse, CliError> {
    client
        .get(&format!("/users/{}", user))
        .await
        .map_err(|e| match e {
            CliError::Api { status: 404, .. } => {
                CliError::NotFound(format!("User '{}' not found", user))
            }
            other => other,
        })
}

async fn update_instances(
    client: &ApiClient,
    user: &str,
    instances: &[String],
) -> Result<UserResponse, CliError> {
    client
        .patch(
            &format!("/users/{}", user),
            &UpdateInstancesRequest {
                id: user,
                instances,
            },
        )
        .await
}

/// List users.
async fn list_users(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let users: Vec<UserResponse> = client.get("/users/").await?;

    print_output(&users, ctx.format);
    Ok(())
}

/// Get user details.
async fn get_user(ctx: CommandContext, args: UserIdArgs) -> Result<()> {
    let client = ctx.client()?;
    let user = fetch_user(&client, &args.user).await?;

    match ctx.format {
        OutputFormat::Table => print_output(std::slice::from_ref(&user), ctx.format),
        OutputFormat::Json => print_single(&user),
    }
    Ok(())
}

/// Assign an instance to a user.
async fn assign(ctx: CommandContext, args: AssignmentArgs) -> Result<()> {
    let client = ctx.client()?;
    let user = fetch_user(&client, &args.user).await?;

    let instances = with_instance(&user.instances, &args.instance);
    let updated = update_instances(&client, &args.user, &instances).await?;

    let next = [ReceiptNextStep {
        label: "Toggle",
        cmd: format!("ecc instances toggle {}", args.instance),
    }];
    print_receipt(
        ctx.format,
        Receipt {
            message: format!("Assigned {} to {}", args.instance, updated.email),
            kind: "users.assign",
            resource_key: "user",
            resource: &updated,
            next: &next,
        },
    );
    Ok(())
}

/// Revoke an instance from a user.
async fn unassign(ctx: CommandContext, args: AssignmentArgs) -> Result<()> {
    let client = ctx.client()?;
    let user = fetch_user(&client, &args.user).await?;

    if !user.instances.contains(&args.instance) {
        return Err(CliError::NotFound(format!(
            "Instance '{}' is not assigned to {}",
            args.instance, user.email
        ))
        .into());
    }

    let instances = without_instance(&user.instances, &args.instance);
    let updated = update_instances(&client, &args.user, &instances).await?;

    print_receipt(
        ctx.format,
        Receipt {
            message: format!("Removed {} from {}", args.instance, updated.email),
            kind: "users.unassign",
            resource_key: "user",
            resource: &updated,
            next: &[],
        },
    );
    Ok(())
}

/// Delete a user.
async fn delete_user(ctx: CommandContext, args: UserIdArgs) -> Result<()> {
    let client = ctx.client()?;
    client
        .delete(&format!("/users/{}", args.user))
        .await
        .map_err(|e| match e {
            CliError::Api { status: 404, .. } => {
                CliError::NotFound(format!("User '{}' not found", args.user))
            }
            other => other,
        })?;

    print_receipt_no_resource(
        ctx.format,
        ReceiptNoResource {
            message: format!("Deleted user {}", args.user),
            kind: "users.delete",
            ids: serde_json::json!({ "user_id": args.user }),
            next: &[],
        },
    );
    Ok(())
}
