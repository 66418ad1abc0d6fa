//! Run-wide context shared by every registry call
//!
//! One [`RunContext`] exists per reconciliation pass. It fixes the "now" used
//! for every age computation, bounds each call by the run deadline, caps
//! concurrent requests per registry host, and carries cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time::Instant;

use crate::config::RunConfig;
use crate::version::error::RegistryError;

/// Caps in-flight requests per registry host
#[derive(Debug)]
pub struct HostLimiter {
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock().unwrap_or_else(|p| p.into_inner());
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone()
    }

    pub async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit, RegistryError> {
        self.semaphore(host)
            .acquire_owned()
            .await
            .map_err(|_| RegistryError::Cancelled)
    }

    /// Permits currently free for a host
    pub fn available(&self, host: &str) -> usize {
        self.semaphore(host).available_permits()
    }
}

/// Cancels the run it was created with
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug)]
pub struct RunContext {
    now: DateTime<Utc>,
    deadline: Instant,
    call_timeout: Duration,
    cancelled: watch::Receiver<bool>,
    limiter: HostLimiter,
}

impl RunContext {
    pub fn new(
        now: DateTime<Utc>,
        run_timeout: Duration,
        call_timeout: Duration,
        connections_per_host: usize,
    ) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let context = Self {
            now,
            deadline: Instant::now() + run_timeout,
            call_timeout,
            cancelled: rx,
            limiter: HostLimiter::new(connections_per_host),
        };
        (context, CancelHandle { tx: Arc::new(tx) })
    }

    pub fn from_config(config: &RunConfig, now: DateTime<Utc>) -> (Self, CancelHandle) {
        Self::new(
            now,
            Duration::from_millis(config.run_timeout_ms),
            Duration::from_millis(config.fetch_timeout_ms),
            config.connections_per_host,
        )
    }

    /// The single reference time for the whole run
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    pub fn limiter(&self) -> &HostLimiter {
        &self.limiter
    }

    /// Time a call may take: the per-call timeout, clipped to the run deadline
    fn budget(&self) -> Duration {
        self.call_timeout
            .min(self.deadline.saturating_duration_since(Instant::now()))
    }

    async fn wait_cancelled(&self) {
        let mut rx = self.cancelled.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Handle dropped without cancelling; the run can no longer be cancelled.
            std::future::pending::<()>().await;
        }
    }

    /// Runs a registry call under the host's connection limit, the call budget
    /// and cancellation.
    pub async fn call<T, F>(&self, host: &str, call: F) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        if self.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }
        let budget = self.budget();
        if budget.is_zero() {
            return Err(RegistryError::Timeout(budget));
        }

        let work = async {
            let _permit = self.limiter.acquire(host).await?;
            call.await
        };

        tokio::select! {
            _ = self.wait_cancelled() => Err(RegistryError::Cancelled),
            result = tokio::time::timeout(budget, work) => {
                result.unwrap_or(Err(RegistryError::Timeout(budget)))
            }
        }
    }
}
