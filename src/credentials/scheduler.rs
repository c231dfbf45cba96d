//! Periodic quota window reset.
//!
//! One [`PeriodicTask`] per service, firing every `rotation_period` and
//! zeroing that service's usage counters. Resets do not depend on any
//! selection activity having happened. Once started, services that
//! appear later get a timer through [`QuotaResetScheduler::ensure`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::pool::CredentialPool;
use crate::task::PeriodicTask;

/// Owns the reset timers for a [`CredentialPool`].
pub struct QuotaResetScheduler {
    pool: Arc<CredentialPool>,
    tasks: BTreeMap<String, PeriodicTask>,
    running: bool,
}

impl QuotaResetScheduler {
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self {
            pool,
            tasks: BTreeMap::new(),
            running: false,
        }
    }

    /// Start a reset timer for every service currently in the pool, using
    /// each service's own rotation period.
    pub async fn start_all(&mut self) {
        self.running = true;
        for service in self.pool.services().await {
            if let Some(config) = self.pool.config(&service).await {
                self.start(&service, config.rotation_period);
            }
        }
    }

    /// Start (or restart) the reset timer for one service.
    pub fn start(&mut self, service: &str, period: Duration) {
        let pool = Arc::clone(&self.pool);
        let name = service.to_string();
        let task = PeriodicTask::spawn("quota-reset", period, move || {
            let pool = Arc::clone(&pool);
            let name = name.clone();
            async move {
                pool.reset_usage(&name).await;
            }
        });
        info!(service, period_secs = period.as_secs(), "quota reset scheduled");
        // dropping the replaced task aborts it
        self.tasks.insert(service.to_string(), task);
    }

    /// Give `service` a timer if the scheduler is running and it has none
    /// yet. Returns `true` when a timer was started.
    pub async fn ensure(&mut self, service: &str) -> bool {
        if !self.running || self.tasks.contains_key(service) {
            return false;
        }
        let Some(config) = self.pool.config(service).await else {
            return false;
        };
        self.start(service, config.rotation_period);
        true
    }

    /// Restart the timer for `service` with its current rotation period.
    /// Does nothing before [`start_all`](Self::start_all) or after
    /// [`stop`](Self::stop).
    pub async fn reschedule(&mut self, service: &str) -> bool {
        if !self.running {
            return false;
        }
        let Some(config) = self.pool.config(service).await else {
            return false;
        };
        self.start(service, config.rotation_period);
        true
    }

    /// Run the reset for `service` immediately. Returns `false` if the
    /// service has no timer or a reset is already in progress.
    pub async fn trigger(&self, service: &str) -> bool {
        match self.tasks.get(service) {
            Some(task) => task.trigger().await,
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Stop every timer, waiting for in-flight resets.
    pub async fn stop(&mut self) {
        self.running = false;
        for (_, task) in std::mem::take(&mut self.tasks) {
            task.stop().await;
        }
    }
}
