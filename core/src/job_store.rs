//! In-memory job registry.
//!
//! Jobs live in a `DashMap` keyed by id, each behind its own async `RwLock`:
//! writers to one job serialize on that lock while operations on different
//! jobs proceed independently. Map guards are never held across an await.

use crate::config::RetentionConfig;
use crate::error::{Result, SlideError};
use crate::job::{Job, JobId, JobSummary};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use slide_common::GenerationRequest;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub struct JobStore {
    jobs: DashMap<JobId, Arc<RwLock<Job>>>,
    retention: RetentionConfig,
}

impl JobStore {
    pub fn new(retention: RetentionConfig) -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
            retention,
        })
    }

    /// Registers a new `queued` job and returns a snapshot of it.
    pub fn create(&self, request: GenerationRequest) -> Job {
        let job = Job::new(JobId::new(), request);
        self.jobs
            .insert(job.id.clone(), Arc::new(RwLock::new(job.clone())));
        tracing::debug!(job_id = %job.id, "job created");
        job
    }

    fn entry(&self, id: &JobId) -> Result<Arc<RwLock<Job>>> {
        self.jobs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SlideError::NotFound { id: id.clone() })
    }

    /// Snapshot of a job.
    pub async fn get(&self, id: &JobId) -> Result<Job> {
        let entry = self.entry(id)?;
        let job = entry.read().await.clone();
        Ok(job)
    }

    /// Reads a projection of a job without cloning the whole record.
    pub async fn read<F, R>(&self, id: &JobId, f: F) -> Result<R>
    where
        F: FnOnce(&Job) -> R,
    {
        let entry = self.entry(id)?;
        let job = entry.read().await;
        Ok(f(&job))
    }

    /// Atomic read-modify-write of one job.
    pub async fn update<F, R>(&self, id: &JobId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        let entry = self.entry(id)?;
        let mut job = entry.write().await;
        Ok(f(&mut job))
    }

    /// Summaries of all retained jobs, oldest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        let mut summaries = Vec::with_capacity(self.jobs.len());
        for entry in self.entries() {
            summaries.push(entry.read().await.summary());
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn entries(&self) -> Vec<Arc<RwLock<Job>>> {
        self.jobs.iter().map(|e| e.value().clone()).collect()
    }

    /// Drops terminal jobs past the retention window, then the oldest terminal
    /// jobs beyond the retained-count bound. Jobs still running are kept.
    pub async fn evict(&self) -> usize {
        self.evict_at(Utc::now()).await
    }

    pub async fn evict_at(&self, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(self.retention.window())
            .unwrap_or_else(|_| chrono::Duration::days(36_500));

        let mut terminal: Vec<(JobId, DateTime<Utc>)> = Vec::new();
        for entry in self.entries() {
            let job = entry.read().await;
            if let (true, Some(done)) = (job.is_terminal(), job.completed_at) {
                terminal.push((job.id.clone(), done));
            }
        }

        let (expired, mut kept): (Vec<_>, Vec<_>) = terminal
            .into_iter()
            .partition(|(_, done)| now.signed_duration_since(*done) >= window);

        let mut evicted = 0;
        for (id, _) in &expired {
            if self.jobs.remove(id).is_some() {
                evicted += 1;
            }
        }

        if kept.len() > self.retention.max_jobs {
            kept.sort_by(|a, b| a.1.cmp(&b.1));
            let overflow = kept.len() - self.retention.max_jobs;
            for (id, _) in kept.iter().take(overflow) {
                if self.jobs.remove(id).is_some() {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            tracing::info!(evicted, remaining = self.jobs.len(), "evicted finished jobs");
        }
        evicted
    }

    /// Runs `evict` on the configured sweep interval until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let every = self.retention.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.evict().await;
            }
        })
    }
}
