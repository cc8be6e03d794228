//! Timed polling loop over the usages endpoint.
//!
//! One run owns a single credential session, refreshed ahead of its
//! expiry, and appends every successful poll to the JSON stream artifact.
//! Per-cycle failures are logged and skipped; only a failed token
//! exchange or a broken artifact aborts the run.

use crate::api::{AuthError, FetchError, Session, UsageApi};
use crate::stream::{StreamError, StreamWriter};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Fixed bounds of one run; set before the loop starts and never moved.
#[derive(Debug, Clone, Copy)]
pub struct RunWindow {
    deadline: DateTime<Utc>,
}

impl RunWindow {
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            deadline: start + duration,
        }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// How one run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Window elapsed; the artifact was left ready to close.
    Completed { cycles: u64 },

    /// Ctrl-C cut the loop; the artifact is missing its outer bracket.
    Interrupted { cycles: u64 },
}

pub struct Collector<A> {
    api: A,
    session: Option<Session>,
    interval: std::time::Duration,
}

impl<A: UsageApi> Collector<A> {
    pub fn new(api: A, interval: std::time::Duration) -> Self {
        Self {
            api,
            session: None,
            interval,
        }
    }

    /// Run poll cycles until the window elapses or the token cancels.
    ///
    /// The caller keeps ownership of the stream: on `Completed` it still
    /// has to be closed, on `Interrupted` it is dropped as-is and the
    /// repair path takes over.
    pub async fn run(
        &mut self,
        window: &RunWindow,
        stream: &mut StreamWriter,
        shutdown: &CancellationToken,
    ) -> Result<CollectOutcome, CollectError> {
        let mut cycles: u64 = 0;

        while !window.expired(Utc::now()) {
            if shutdown.is_cancelled() {
                return Ok(CollectOutcome::Interrupted { cycles });
            }

            self.run_cycle(stream, cycles).await?;
            cycles += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => {
                    return Ok(CollectOutcome::Interrupted { cycles });
                }
            }
        }

        Ok(CollectOutcome::Completed { cycles })
    }

    /// One poll cycle: refresh check, fetch, append or skip.
    async fn run_cycle(&mut self, stream: &mut StreamWriter, row: u64) -> Result<(), CollectError> {
        let session = self.ensure_session(Utc::now()).await?;

        tracing::info!(row, "Getting usage data");

        match self.api.fetch_usage(&session).await {
            Ok(value) => {
                stream.append(&value.to_string())?;
                tracing::debug!(elements = stream.elements(), "Appended usage payload");
            }
            Err(FetchError::UnexpectedPayload { body }) => {
                tracing::warn!(%body, "API returned an unexpected response, skipping cycle");
            }
            Err(FetchError::Transport(err)) => {
                tracing::warn!(error = %err, "Failed to reach the usage API, skipping cycle");
            }
        }

        Ok(())
    }

    /// The refresh decision is evaluated exactly once per cycle, before
    /// the request.
    async fn ensure_session(&mut self, now: DateTime<Utc>) -> Result<Session, AuthError> {
        match &self.session {
            Some(session) if !session.needs_refresh(now) => Ok(session.clone()),
            _ => {
                tracing::info!("Credential missing or near expiry, requesting a new token");
                let fresh = self.api.exchange_token().await?;
                self.session = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }
}
