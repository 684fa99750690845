//! Power state and watch lifecycle types.

use serde::{Deserialize, Serialize};

/// Observable power state of a remote instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Running,
    Stopped,
    /// Between states (pending, stopping, shutting-down).
    Transitioning,
    /// Anything the console does not recognise, including terminated.
    Unknown,
}

impl PowerState {
    /// Map a remote state name onto a power state.
    pub fn from_remote(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "pending" | "stopping" | "shutting-down" | "transitioning" => Self::Transitioning,
            _ => Self::Unknown,
        }
    }

    /// The state a toggle drives towards from `self`.
    ///
    /// Only `Running` maps to `Stopped`; every other state is treated as
    /// off and targets `Running`.
    pub fn toggle_target(self) -> Self {
        match self {
            Self::Running => Self::Stopped,
            _ => Self::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Transitioning => "transitioning",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PowerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_remote(s))
    }
}

/// Lifecycle phase of a watch.
///
/// `Idle -> Requesting -> Polling -> {Converged | Cancelled | Failed | TimedOut}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchPhase {
    Idle,
    Requesting,
    Polling,
    Converged,
    Cancelled,
    Failed,
    TimedOut,
}

impl WatchPhase {
    /// Returns true for the four phases that end a watch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Converged | Self::Cancelled | Self::Failed | Self::TimedOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PowerState::Running, PowerState::Stopped)]
    #[case(PowerState::Stopped, PowerState::Running)]
    #[case(PowerState::Transitioning, PowerState::Running)]
    #[case(PowerState::Unknown, PowerState::Running)]
    fn test_toggle_target(#[case] current: PowerState, #[case] expected: PowerState) {
        assert_eq!(current.toggle_target(), expected);
    }

    #[rstest]
    #[case("running", PowerState::Running)]
    #[case("Stopped", PowerState::Stopped)]
    #[case("pending", PowerState::Transitioning)]
    #[case("stopping", PowerState::Transitioning)]
    #[case("shutting-down", PowerState::Transitioning)]
    #[case("terminated", PowerState::Unknown)]
    #[case("", PowerState::Unknown)]
    fn test_from_remote(#[case] name: &str, #[case] expected: PowerState) {
        assert_eq!(PowerState::from_remote(name), expected);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!WatchPhase::Idle.is_terminal());
        assert!(!WatchPhase::Polling.is_terminal());
        assert!(WatchPhase::Converged.is_terminal());
        assert!(WatchPhase::TimedOut.is_terminal());
    }
}
