// src/core/rate_limiter.rs

//! Per-client admission control.
//!
//! Each client has a sliding-window log of admitted request times. A request
//! is admitted while fewer than `limit` entries fall inside the window ending
//! now; rejected requests are not logged, so a client that keeps hammering
//! does not push its own reset further out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::clock::{add_duration, Clock};
use crate::core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Rejected { retry_after: Duration },
}

/// Backing store for the sliding-window logs.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn try_acquire(
        &self,
        client: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Admission;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    logs: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients with requests still inside their window.
    pub fn tracked_clients(&self) -> usize {
        self.logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Drops log entries that have left the window.
fn prune(log: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    while let Some(oldest) = log.front() {
        if add_duration(*oldest, window) <= now {
            log.pop_front();
        } else {
            break;
        }
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn try_acquire(
        &self,
        client: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Admission {
        let mut logs = self
            .logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clients whose newest request has left the window are forgotten.
        logs.retain(|_, log| log.back().is_some_and(|newest| add_duration(*newest, window) > now));
        let log = logs.entry(client.to_string()).or_default();
        prune(log, now, window);

        let used = u32::try_from(log.len()).unwrap_or(u32::MAX);
        if used >= limit {
            if log.is_empty() {
                logs.remove(client);
                return Admission::Rejected { retry_after: window };
            }
            let retry_after = log
                .front()
                .map(|oldest| {
                    (add_duration(*oldest, window) - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                })
                .unwrap_or(window);
            return Admission::Rejected { retry_after };
        }

        log.push_back(now);
        Admission::Admitted {
            remaining: limit - used - 1,
        }
    }
}

/// Gatekeeper checked before any probe runs.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        limit: u32,
        window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            limit,
            window,
        }
    }

    /// # Errors
    /// [`Error::RateLimitExceeded`] when `client` has used its quota for the
    /// current window.
    pub async fn check(&self, client: &str) -> Result<()> {
        let now = self.clock.now();
        match self
            .store
            .try_acquire(client, now, self.window, self.limit)
            .await
        {
            Admission::Admitted { remaining } => {
                debug!(client, remaining, "Request admitted.");
                Ok(())
            }
            Admission::Rejected { retry_after } => {
                warn!(client, retry_after = ?retry_after, "Rate limit exceeded.");
                Err(Error::RateLimitExceeded {
                    client: client.to_string(),
                    retry_after,
                })
            }
        }
    }
}
