use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::StreamError;

/// One time budget for a whole query, shared by every transport attempt.
///
/// Created once when the query is issued and passed down by reference;
/// attempts never get a fresh window.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    /// The full budget this deadline was created with.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Run `fut` until it finishes or the deadline passes.
    pub async fn bound<F, T>(&self, fut: F) -> Result<T, StreamError>
    where
        F: Future<Output = Result<T, StreamError>>,
    {
        match tokio::time::timeout_at(self.expires_at, fut).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Timeout(self.budget)),
        }
    }

    #[must_use]
    pub fn timeout_error(&self) -> StreamError {
        StreamError::Timeout(self.budget)
    }
}
