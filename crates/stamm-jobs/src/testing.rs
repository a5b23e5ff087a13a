//! In-memory fakes of the repository seams, for exercising the enqueue
//! hooks and drain pipelines without Postgres.
//!
//! Always compiled (not `#[cfg(test)]`) so integration tests and downstream
//! crates can drive the workers deterministically. Behavior mirrors the
//! Postgres implementations where the pipelines depend on it: dedup guards,
//! oldest-first claiming, attempt counting on claim.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use stamm_core::{
    new_v7, AiJob, AiJobPayload, AiJobRepository, BehaviorEvent, ChatLine, CoordinationLock,
    Error, JobStatus, MemberRepository, MemberScoreRow, MessageRepository, NewBotMessage,
    QueueStats, Result, TaggingJob, TaggingJobPayload, TaggingJobRepository, TaggingPayload,
    TaggingStatus, TasteProfile, TasteRepository, TasteWindow,
};
use stamm_inference::{ProviderError, ProviderResult};

use crate::media::MediaFetcher;

fn stats_for(statuses: impl Iterator<Item = JobStatus>) -> QueueStats {
    let mut stats = QueueStats {
        pending: 0,
        processing: 0,
        completed: 0,
        failed: 0,
        total: 0,
    };
    for status in statuses {
        stats.total += 1;
        match status {
            JobStatus::Pending => stats.pending += 1,
            JobStatus::Processing => stats.processing += 1,
            JobStatus::Completed => stats.completed += 1,
            JobStatus::Failed => stats.failed += 1,
        }
    }
    stats
}

// =============================================================================
// AI RESPONSE JOBS
// =============================================================================

#[derive(Default)]
pub struct InMemoryAiJobs {
    jobs: Mutex<Vec<AiJob>>,
    max_attempts: i32,
}

impl InMemoryAiJobs {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            max_attempts: stamm_core::defaults::JOB_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn snapshot(&self) -> Vec<AiJob> {
        self.jobs.lock().expect("jobs lock").clone()
    }
}

#[async_trait]
impl AiJobRepository for InMemoryAiJobs {
    async fn enqueue_deduplicated(
        &self,
        source_message_id: Uuid,
        target_key: &str,
        payload: &AiJobPayload,
    ) -> Result<Option<Uuid>> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        let duplicate = jobs.iter().any(|j| {
            j.source_message_id == source_message_id
                && j.target_key == target_key
                && j.status != JobStatus::Failed
        });
        if duplicate {
            return Ok(None);
        }
        let id = new_v7();
        jobs.push(AiJob {
            id,
            status: JobStatus::Pending,
            source_message_id,
            target_key: target_key.to_string(),
            payload: payload.clone(),
            attempts: 0,
            max_attempts: self.max_attempts,
            last_error: None,
            created_at: Utc::now(),
        });
        Ok(Some(id))
    }

    async fn claim_batch(&self, max_jobs: i64) -> Result<Vec<AiJob>> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        let mut pending: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| jobs[i].created_at);
        pending.truncate(max_jobs.max(0) as usize);

        let mut claimed = Vec::with_capacity(pending.len());
        for index in pending {
            let job = &mut jobs[index];
            job.status = JobStatus::Processing;
            job.attempts += 1;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Completed;
        }
        Ok(())
    }

    async fn release_for_retry(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Pending;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn active_count_for_target(&self, target_key: &str) -> Result<i64> {
        let jobs = self.jobs.lock().expect("jobs lock");
        Ok(jobs
            .iter()
            .filter(|j| {
                j.target_key == target_key
                    && matches!(j.status, JobStatus::Pending | JobStatus::Processing)
            })
            .count() as i64)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let jobs = self.jobs.lock().expect("jobs lock");
        Ok(stats_for(jobs.iter().map(|j| j.status)))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<AiJob>> {
        let jobs = self.jobs.lock().expect("jobs lock");
        Ok(jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<AiJob>> {
        let jobs = self.jobs.lock().expect("jobs lock");
        let mut recent: Vec<AiJob> = jobs.clone();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }
}

// =============================================================================
// TAGGING JOBS
// =============================================================================

#[derive(Default)]
pub struct InMemoryTaggingJobs {
    jobs: Mutex<Vec<TaggingJob>>,
    max_attempts: i32,
}

impl InMemoryTaggingJobs {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            max_attempts: stamm_core::defaults::JOB_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn snapshot(&self) -> Vec<TaggingJob> {
        self.jobs.lock().expect("jobs lock").clone()
    }
}

#[async_trait]
impl TaggingJobRepository for InMemoryTaggingJobs {
    async fn enqueue_deduplicated(
        &self,
        source_message_id: Uuid,
        payload: &TaggingJobPayload,
    ) -> Result<Option<Uuid>> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        let duplicate = jobs
            .iter()
            .any(|j| j.source_message_id == source_message_id && j.status != JobStatus::Failed);
        if duplicate {
            return Ok(None);
        }
        let id = new_v7();
        jobs.push(TaggingJob {
            id,
            status: JobStatus::Pending,
            source_message_id,
            payload: payload.clone(),
            attempts: 0,
            max_attempts: self.max_attempts,
            last_error: None,
            created_at: Utc::now(),
        });
        Ok(Some(id))
    }

    async fn claim_batch(&self, max_jobs: i64) -> Result<Vec<TaggingJob>> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        let mut pending: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| jobs[i].created_at);
        pending.truncate(max_jobs.max(0) as usize);

        let mut claimed = Vec::with_capacity(pending.len());
        for index in pending {
            let job = &mut jobs[index];
            job.status = JobStatus::Processing;
            job.attempts += 1;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Completed;
        }
        Ok(())
    }

    async fn release_for_retry(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Pending;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let jobs = self.jobs.lock().expect("jobs lock");
        Ok(stats_for(jobs.iter().map(|j| j.status)))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<TaggingJob>> {
        let jobs = self.jobs.lock().expect("jobs lock");
        Ok(jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<TaggingJob>> {
        let jobs = self.jobs.lock().expect("jobs lock");
        let mut recent: Vec<TaggingJob> = jobs.clone();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[derive(Default)]
pub struct InMemoryMessages {
    bot_messages: Mutex<Vec<(Uuid, NewBotMessage)>>,
    roots: Mutex<HashMap<Uuid, Uuid>>,
    histories: Mutex<HashMap<Uuid, Vec<ChatLine>>>,
    tagging_statuses: Mutex<HashMap<Uuid, TaggingStatus>>,
    tagging_payloads: Mutex<HashMap<Uuid, TaggingPayload>>,
    tagging_errors: Mutex<HashMap<Uuid, String>>,
    next_insert_error: Mutex<Option<String>>,
    next_write_error: Mutex<Option<String>>,
}

impl InMemoryMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the root ancestor of a message (defaults to the message itself).
    pub fn set_root(&self, message_id: Uuid, root_id: Uuid) {
        self.roots
            .lock()
            .expect("roots lock")
            .insert(message_id, root_id);
    }

    /// Seed the reply-chain history returned for a message, oldest first.
    pub fn set_history(&self, message_id: Uuid, history: Vec<ChatLine>) {
        self.histories
            .lock()
            .expect("histories lock")
            .insert(message_id, history);
    }

    /// All bot messages inserted so far, in insertion order.
    pub fn bot_messages(&self) -> Vec<(Uuid, NewBotMessage)> {
        self.bot_messages.lock().expect("messages lock").clone()
    }

    pub fn tagging_status(&self, message_id: Uuid) -> Option<TaggingStatus> {
        self.tagging_statuses
            .lock()
            .expect("statuses lock")
            .get(&message_id)
            .copied()
    }

    pub fn tagging_payload(&self, message_id: Uuid) -> Option<TaggingPayload> {
        self.tagging_payloads
            .lock()
            .expect("payloads lock")
            .get(&message_id)
            .cloned()
    }

    pub fn tagging_error(&self, message_id: Uuid) -> Option<String> {
        self.tagging_errors
            .lock()
            .expect("errors lock")
            .get(&message_id)
            .cloned()
    }

    /// Make the next `insert_bot_message` call fail once.
    pub fn fail_next_insert(&self, reason: &str) {
        *self.next_insert_error.lock().expect("insert error lock") = Some(reason.to_string());
    }

    /// Make the next `write_tagging` call fail once.
    pub fn fail_next_write(&self, reason: &str) {
        *self.next_write_error.lock().expect("write error lock") = Some(reason.to_string());
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessages {
    async fn insert_bot_message(&self, message: &NewBotMessage) -> Result<Uuid> {
        if let Some(reason) = self.next_insert_error.lock().expect("insert error lock").take() {
            return Err(Error::Internal(reason));
        }
        let id = new_v7();
        self.bot_messages
            .lock()
            .expect("messages lock")
            .push((id, message.clone()));
        Ok(id)
    }

    async fn root_ancestor(&self, message_id: Uuid) -> Result<Uuid> {
        let roots = self.roots.lock().expect("roots lock");
        Ok(roots.get(&message_id).copied().unwrap_or(message_id))
    }

    async fn thread_history(&self, message_id: Uuid, limit: usize) -> Result<Vec<ChatLine>> {
        let histories = self.histories.lock().expect("histories lock");
        let lines = histories.get(&message_id).cloned().unwrap_or_default();
        // Keep the nearest ancestors when the chain exceeds the window.
        let start = lines.len().saturating_sub(limit);
        Ok(lines[start..].to_vec())
    }

    async fn mark_tagging_processing(&self, message_id: Uuid) -> Result<()> {
        self.tagging_statuses
            .lock()
            .expect("statuses lock")
            .insert(message_id, TaggingStatus::Processing);
        Ok(())
    }

    async fn write_tagging(&self, message_id: Uuid, payload: &TaggingPayload) -> Result<()> {
        if let Some(reason) = self.next_write_error.lock().expect("write error lock").take() {
            return Err(Error::Internal(reason));
        }
        self.tagging_payloads
            .lock()
            .expect("payloads lock")
            .insert(message_id, payload.clone());
        self.tagging_statuses
            .lock()
            .expect("statuses lock")
            .insert(message_id, TaggingStatus::Completed);
        self.tagging_errors
            .lock()
            .expect("errors lock")
            .remove(&message_id);
        Ok(())
    }

    async fn mark_tagging_failed(&self, message_id: Uuid, error: &str) -> Result<()> {
        self.tagging_statuses
            .lock()
            .expect("statuses lock")
            .insert(message_id, TaggingStatus::Failed);
        self.tagging_errors
            .lock()
            .expect("errors lock")
            .insert(message_id, error.to_string());
        Ok(())
    }
}

// =============================================================================
// TASTE & MEMBERS
// =============================================================================

#[derive(Default)]
pub struct InMemoryTaste {
    events: Mutex<Vec<BehaviorEvent>>,
    profiles: Mutex<HashMap<(Uuid, TasteWindow), TasteProfile>>,
}

impl InMemoryTaste {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TasteRepository for InMemoryTaste {
    async fn append_event(&self, event: &BehaviorEvent) -> Result<()> {
        self.events
            .lock()
            .expect("events lock")
            .push(event.clone());
        Ok(())
    }

    async fn events_for_user(
        &self,
        user_id: Uuid,
        window: TasteWindow,
    ) -> Result<Vec<BehaviorEvent>> {
        let cutoff = window.days().map(|d| Utc::now() - Duration::days(d));
        let events = self.events.lock().expect("events lock");
        Ok(events
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter(|e| cutoff.map_or(true, |c| e.occurred_at >= c))
            .cloned()
            .collect())
    }

    async fn store_profile(
        &self,
        user_id: Uuid,
        window: TasteWindow,
        profile: &TasteProfile,
    ) -> Result<()> {
        self.profiles
            .lock()
            .expect("profiles lock")
            .insert((user_id, window), profile.clone());
        Ok(())
    }

    async fn profile(&self, user_id: Uuid, window: TasteWindow) -> Result<Option<TasteProfile>> {
        let profiles = self.profiles.lock().expect("profiles lock");
        Ok(profiles.get(&(user_id, window)).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryMembers {
    rows: Mutex<HashMap<Uuid, MemberScoreRow>>,
}

impl InMemoryMembers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a score row directly, bypassing `add_points`.
    pub fn seed(&self, row: MemberScoreRow) {
        self.rows
            .lock()
            .expect("rows lock")
            .insert(row.user_id, row);
    }
}

#[async_trait]
impl MemberRepository for InMemoryMembers {
    async fn score_row(&self, user_id: Uuid) -> Result<Option<MemberScoreRow>> {
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows.get(&user_id).cloned())
    }

    async fn add_points(&self, user_id: Uuid, points: i64) -> Result<MemberScoreRow> {
        let mut rows = self.rows.lock().expect("rows lock");
        let row = rows.entry(user_id).or_insert(MemberScoreRow {
            user_id,
            raw_score: 0,
            last_active_at: None,
        });
        row.raw_score = (row.raw_score + points).max(0);
        row.last_active_at = Some(Utc::now());
        Ok(row.clone())
    }
}

// =============================================================================
// MEDIA
// =============================================================================

/// Canned media store standing in for HTTP fetches.
///
/// Any URL not registered with [`FakeMedia::serve`] fails validation, which
/// is how tests model dead candidate links.
#[derive(Default)]
pub struct FakeMedia {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

/// Smallest well-formed GIF header, enough to pass magic-byte checks.
pub const GIF_STUB: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.bodies
            .lock()
            .expect("bodies lock")
            .insert(url.to_string(), bytes);
    }

    /// Register a URL that validates as a GIF.
    pub fn serve_gif(&self, url: &str) {
        self.serve(url, GIF_STUB.to_vec());
    }
}

#[async_trait]
impl MediaFetcher for FakeMedia {
    async fn fetch_gif(&self, url: &str) -> ProviderResult<Vec<u8>> {
        let bodies = self.bodies.lock().expect("bodies lock");
        match bodies.get(url) {
            Some(bytes) if stamm_inference::is_gif_bytes(bytes) => Ok(bytes.clone()),
            Some(_) => Err(ProviderError::Other(format!("{url} is not a GIF"))),
            None => Err(ProviderError::Other(format!("no media at {url}"))),
        }
    }
}

// =============================================================================
// COORDINATION LOCK
// =============================================================================

/// Fake advisory lock. `hold_externally` simulates another process owning a
/// lock name, which makes the drain entry points skip.
#[derive(Default)]
pub struct InMemoryLock {
    held: Mutex<HashSet<String>>,
    foreign: Mutex<HashSet<String>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold_externally(&self, name: &str) {
        self.foreign
            .lock()
            .expect("foreign lock")
            .insert(name.to_string());
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().expect("held lock").contains(name)
    }
}

#[async_trait]
impl CoordinationLock for InMemoryLock {
    async fn try_acquire(&self, name: &str) -> Result<bool> {
        if self.foreign.lock().expect("foreign lock").contains(name) {
            return Ok(false);
        }
        Ok(self.held.lock().expect("held lock").insert(name.to_string()))
    }

    async fn release(&self, name: &str) -> Result<()> {
        self.held.lock().expect("held lock").remove(name);
        Ok(())
    }
}
