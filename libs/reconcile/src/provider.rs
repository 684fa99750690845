//! Status provider interface and scripted mock implementation.
//!
//! The provider abstracts the remote API that owns instance state:
//! - Reading the current power state
//! - Requesting a power transition (acknowledged, completes asynchronously)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProviderError;
use crate::state::PowerState;

/// Remote API exposing instance power state.
#[async_trait]
pub trait StatusProvider: Send + Sync + 'static {
    /// Read the current state of a resource.
    async fn get_state(&self, resource_id: &str) -> Result<PowerState, ProviderError>;

    /// Ask the remote side to toggle a resource.
    ///
    /// Success is an acknowledgement only; the state change happens later.
    async fn request_transition(&self, resource_id: &str) -> Result<(), ProviderError>;
}

#[async_trait]
impl<P: StatusProvider + ?Sized> StatusProvider for Arc<P> {
    async fn get_state(&self, resource_id: &str) -> Result<PowerState, ProviderError> {
        (**self).get_state(resource_id).await
    }

    async fn request_transition(&self, resource_id: &str) -> Result<(), ProviderError> {
        (**self).request_transition(resource_id).await
    }
}

/// Scripted provider for tests and dry runs.
///
/// `get_state` pops scripted responses in order; once the script is empty it
/// keeps answering with the last successful state (or `Unknown`).
pub struct MockProvider {
    script: Mutex<VecDeque<Result<PowerState, ProviderError>>>,
    last_state: Mutex<PowerState>,
    request_result: Mutex<Result<(), ProviderError>>,
    state_calls: AtomicU64,
    request_calls: AtomicU64,
}

impl MockProvider {
    /// Create a provider that acknowledges requests and reports `initial`.
    pub fn new(initial: PowerState) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last_state: Mutex::new(initial),
            request_result: Mutex::new(Ok(())),
            state_calls: AtomicU64::new(0),
            request_calls: AtomicU64::new(0),
        }
    }

    /// Create a provider whose transition requests always fail.
    pub fn rejecting(error: ProviderError) -> Self {
        Self {
            request_result: Mutex::new(Err(error)),
            ..Self::new(PowerState::Unknown)
        }
    }

    /// Change the result of subsequent transition requests.
    pub async fn set_request_result(&self, result: Result<(), ProviderError>) {
        *self.request_result.lock().await = result;
    }

    /// Queue the responses returned by subsequent `get_state` calls.
    pub async fn script<I>(&self, responses: I)
    where
        I: IntoIterator<Item = Result<PowerState, ProviderError>>,
    {
        self.script.lock().await.extend(responses);
    }

    /// Queue plain states.
    pub async fn script_states<I>(&self, states: I)
    where
        I: IntoIterator<Item = PowerState>,
    {
        self.script(states.into_iter().map(Ok)).await;
    }

    /// Number of `get_state` calls seen so far.
    pub fn state_calls(&self) -> u64 {
        self.state_calls.load(Ordering::SeqCst)
    }

    /// Number of `request_transition` calls seen so far.
    pub fn request_calls(&self) -> u64 {
        self.request_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProvider for MockProvider {
    async fn get_state(&self, resource_id: &str) -> Result<PowerState, ProviderError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().await.pop_front();
        let mut last = self.last_state.lock().await;
        let result = match next {
            Some(Ok(state)) => {
                *last = state;
                Ok(state)
            }
            Some(Err(e)) => Err(e),
            None => Ok(*last),
        };

        debug!(resource_id, result = ?result, "Mock state read");
        result
    }

    async fn request_transition(&self, resource_id: &str) -> Result<(), ProviderError> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        debug!(resource_id, "Mock transition request");
        self.request_result.lock().await.clone()
    }
}
