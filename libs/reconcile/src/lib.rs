//! Power-state reconciliation for remote instances.
//!
//! A toggle is fire-and-forget on the remote side: the API acknowledges the
//! request and the instance changes state some time later. This library
//! closes the loop by polling until the change is observed. Key concepts:
//!
//! - **Target state**: the complement of the state before the request.
//! - **Watch**: the per-resource polling task started after the request.
//! - **Outcome**: how a watch ended (converged, cancelled, failed, timed out).
//!
//! # Invariants
//!
//! - At most one live watch per resource id
//! - Every watch ends with exactly one outcome
//! - No poll is issued after a watch has ended
//! - Polls for one watch never overlap

mod error;
mod policy;
mod poller;
mod provider;
mod state;

use std::time::Duration;

pub use error::{PolicyError, PollError, ProviderError, RequestError};
pub use policy::{PollPolicy, TargetResolution};
pub use poller::{Outcome, Poller, TransitionHandle, WatchEvent, WatchId};
pub use provider::{MockProvider, StatusProvider};
pub use state::{PowerState, WatchPhase};

/// Default period between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of polls before a watch times out.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Default wall-clock bound on a watch.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5 * 60); // 5 minutes

/// Default number of consecutive failed polls before a watch fails.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Longest accepted poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default timeout on each provider call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
