// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Minimal recurring job scheduler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Longest the run loop sleeps before looking at the schedule again.
pub const MAX_IDLE: Duration = Duration::from_secs(30);

type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Job {
    name: String,
    interval: Duration,
    next_run: Instant,
    task: Task,
}

#[derive(Default)]
pub struct CronManager {
    jobs: Vec<Job>,
}

impl CronManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `interval`, first one `interval` from now.
    pub fn every<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(job = %name, interval_secs = interval.as_secs(), "scheduled job");
        self.jobs.push(Job {
            name,
            interval,
            next_run: Instant::now() + interval,
            task: Arc::new(move || task().boxed()),
        });
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Time until the next due job, capped at [`MAX_IDLE`].
    pub fn idle_duration(&self, now: Instant) -> Duration {
        self.jobs
            .iter()
            .map(|j| j.next_run.saturating_duration_since(now))
            .min()
            .map_or(MAX_IDLE, |d| d.min(MAX_IDLE))
    }

    /// Run every job due at `now`. Returns how many ran.
    pub async fn run_pending(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        for job in self.jobs.iter_mut().filter(|j| j.next_run <= now) {
            debug!(job = %job.name, "running job");
            (job.task)().await;
            job.next_run = now + job.interval;
            ran += 1;
        }
        ran
    }

    /// Drive the schedule until `shutdown` turns true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(jobs = self.jobs.len(), "scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_pending(Instant::now()).await;
            let idle = self.idle_duration(Instant::now());
            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(cron: &mut CronManager, interval: Duration) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        cron.every("count", interval, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    #[tokio::test(start_paused = true)]
    async fn idle_is_capped() {
        let mut cron = CronManager::new();
        assert_eq!(cron.idle_duration(Instant::now()), MAX_IDLE);

        counting(&mut cron, Duration::from_secs(10));
        assert_eq!(cron.idle_duration(Instant::now()), Duration::from_secs(10));

        let mut hourly = CronManager::new();
        counting(&mut hourly, Duration::from_secs(3600));
        assert_eq!(hourly.idle_duration(Instant::now()), MAX_IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_jobs_run_once_per_interval() {
        let mut cron = CronManager::new();
        let count = counting(&mut cron, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(cron.run_pending(start).await, 0);
        assert_eq!(cron.run_pending(start + Duration::from_secs(60)).await, 1);
        assert_eq!(cron.run_pending(start + Duration::from_secs(90)).await, 0);
        assert_eq!(cron.run_pending(start + Duration::from_secs(120)).await, 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_fires_hourly_and_stops() {
        let mut cron = CronManager::new();
        let count = counting(&mut cron, Duration::from_secs(3600));
        assert_eq!(cron.job_names(), ["count"]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(cron.run(rx));

        tokio::time::sleep(Duration::from_secs(2 * 3600 + 1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_stops_loop() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(CronManager::new().run(rx));
        drop(tx);
        handle.await.unwrap();
    }
}
