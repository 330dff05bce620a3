//! Request lifecycle: one outstanding request per logical slot, with
//! cancellation, timeouts and bounded retry.
//!
//! A [`RequestSlot`] hands out [`Ticket`]s. Starting a new request cancels the
//! previous ticket's token and bumps the slot generation, so a slow response
//! from a superseded request fails the [`RequestSlot::is_current`] check and
//! is dropped instead of overwriting fresher state.
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;
use crate::entity::EntityId;

/// Identifies one issued request: the slot generation at issue time plus the
/// token that aborts it.
#[derive(Debug, Clone)]
pub struct Ticket {
    generation: u64,
    token: CancellationToken,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Owner of a single logical request slot (e.g. "stats for the page being
/// viewed"). Dropping the slot cancels whatever is in flight.
#[derive(Debug)]
pub struct RequestSlot {
    name: &'static str,
    generation: u64,
    token: Option<CancellationToken>,
}

impl RequestSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: 0,
            token: None,
        }
    }

    /// Start a new request, superseding any request still in flight.
    pub fn begin(&mut self) -> Ticket {
        if let Some(previous) = self.token.take() {
            previous.cancel();
            tracing::debug!(
                slot = self.name,
                generation = self.generation,
                "Superseding in-flight request"
            );
        }
        self.generation = self.generation.wrapping_add(1);
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        Ticket {
            generation: self.generation,
            token,
        }
    }

    /// Apply-time check: only the most recently issued, uncancelled ticket
    /// may mutate state.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.generation == self.generation && !ticket.token.is_cancelled()
    }

    /// Mark the ticket's request as settled. Returns `false` (and changes
    /// nothing) if the ticket was superseded.
    pub fn settle(&mut self, ticket: &Ticket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.token = None;
        true
    }

    pub fn in_flight(&self) -> bool {
        self.token.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the in-flight request, if any. Results from it will fail
    /// [`is_current`](Self::is_current).
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
            tracing::debug!(slot = self.name, generation = self.generation, "Cancelled request");
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

impl Drop for RequestSlot {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

/// Per-operation timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Lookups, searches and list pages.
    #[serde(with = "secs")]
    pub lookup: Duration,
    /// Heavy aggregate computations (stats, recommendations).
    #[serde(with = "secs")]
    pub aggregate: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            lookup: Duration::from_secs(10),
            aggregate: Duration::from_secs(60),
        }
    }
}

/// Bounded automatic retry with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "secs", rename = "delay_secs")]
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    /// Two retries ten seconds apart: long enough for the backend to finish
    /// an in-progress import.
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(10),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Run `fut`, failing with [`ApiError::Timeout`] after `timeout` or
/// [`ApiError::Cancelled`] as soon as `token` fires.
pub async fn run_with_timeout<T, F>(
    timeout: Duration,
    token: &CancellationToken,
    fut: F,
) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ApiError::Cancelled),
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(ApiError::Timeout(timeout)),
        },
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's retries are used up. `op` receives the zero-based attempt number.
///
/// Each call starts with a fresh counter, so a user-triggered retry always
/// gets the full budget again.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                tracing::debug!(
                    error = %e,
                    retry = attempt + 1,
                    delay_secs = policy.delay.as_secs(),
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(ApiError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// How a failure is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    NotFound,
    Other,
}

impl FailureKind {
    pub fn classify(err: &ApiError) -> Self {
        match err {
            ApiError::Timeout(_) => Self::Timeout,
            ApiError::NotFound => Self::NotFound,
            _ => Self::Other,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Timeout => {
                "The request timed out. The server may still be working on it, so try again shortly."
            }
            Self::NotFound => "User not found or list is private.",
            Self::Other => "Something went wrong while loading this page.",
        }
    }
}

/// Error panel contents for a failed primary load: a message, the
/// underlying detail, and a link to the same content on VNDB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub kind: FailureKind,
    pub detail: String,
    pub upstream_url: String,
}

impl LoadFailure {
    pub fn new(entity: &EntityId, err: &ApiError) -> Self {
        Self {
            kind: FailureKind::classify(err),
            detail: err.to_string(),
            upstream_url: entity.upstream_url(),
        }
    }

    pub fn message(&self) -> &'static str {
        self.kind.message()
    }
}
