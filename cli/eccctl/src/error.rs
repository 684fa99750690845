//! Error handling and display for the CLI.

use colored::Colorize;
use ecc_reconcile::{PollError, ProviderError, RequestError};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Not authenticated. Run `ecc auth login` to authenticate.")]
    NotAuthenticated,

    #[error("API error ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create an API error from response details.
    pub fn api(status: u16, detail: impl Into<String>) -> Self {
        Self::Api {
            status,
            detail: detail.into(),
        }
    }

    /// Map onto the poller's provider error.
    pub fn into_provider_error(self) -> ProviderError {
        match self {
            Self::NotAuthenticated => ProviderError::Rejected {
                status: 401,
                message: "not authenticated".to_string(),
            },
            Self::Api { status: 404, detail } => ProviderError::NotFound(detail),
            Self::Api { status, detail } => ProviderError::Rejected {
                status,
                message: detail,
            },
            Self::Network(e) => ProviderError::Transport(e.to_string()),
            Self::NotFound(what) => ProviderError::NotFound(what),
            Self::Other(e) => ProviderError::InvalidResponse(e.to_string()),
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    // Check for specific error types and provide hints
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::NotAuthenticated => {
                eprintln!(
                    "\n{}",
                    "Hint: Run `ecc auth login` to authenticate.".yellow()
                );
            }
            CliError::Api { status, .. } if *status == 403 => {
                eprintln!(
                    "\n{}",
                    "Hint: This operation needs an administrator account.".yellow()
                );
            }
            CliError::Network(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check your network connection and API endpoint (`ecc config show`)."
                        .yellow()
                );
            }
            _ => {}
        }
    }

    let provider_err = err
        .downcast_ref::<RequestError>()
        .and_then(RequestError::provider_error)
        .or_else(|| err.downcast_ref::<PollError>().map(|e| &e.source))
        .or_else(|| err.downcast_ref::<ProviderError>());
    if let Some(ProviderError::Rejected { status: 401, .. }) = provider_err {
        eprintln!(
            "\n{}",
            "Hint: Your session may have expired. Run `ecc auth login`.".yellow()
        );
    }
}
