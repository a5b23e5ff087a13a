//! AI response queue worker.
//!
//! Drains the AI response queue under the `ai_response_queue` advisory lock:
//! claims a batch, resolves the mentioned provider backend, and turns each
//! job into exactly one chat message: a generated reply, a poll, a GIF
//! reply, or a notice when nothing better is possible. Provider failures run
//! through the attempt ladder ([`AttemptMode`]); infrastructure failures
//! propagate to the caller.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stamm_core::defaults::AI_QUEUE_LOCK;
use stamm_core::{
    AiJob, AiJobRepository, ChatLine, CoordinationLock, Error, EventBus, MessageKind,
    MessageRepository, NewBotMessage, PollSpec, Provider, QueueRunSummary, Result, ServerEvent,
    TaggingJobPayload, TaggingJobRepository,
};
use stamm_inference::{
    ChatProvider, ChatTurn, ContentBlock, GenerationRequest, GifProvider, ProviderError, Role,
};

use crate::config::JobsConfig;
use crate::enqueue::SYSTEM_AUTHOR;
use crate::gif_intent::detect_gif_query;
use crate::media::MediaFetcher;
use crate::poll::parse_poll;
use crate::retry::AttemptMode;

/// Candidate URLs requested per GIF search.
const GIF_CANDIDATE_LIMIT: usize = 8;

fn disabled_notice(provider: Provider) -> String {
    format!(
        "{} ist in diesem Chat momentan nicht verfügbar.",
        provider.display_name()
    )
}

fn failure_notice(provider: Provider) -> String {
    format!(
        "{} konnte leider keine Antwort liefern. Bitte versucht es später noch einmal.",
        provider.display_name()
    )
}

fn gif_caption(query: &str) -> String {
    format!("Hier ist ein GIF zu \"{query}\"!")
}

fn gif_fallback(query: &str) -> String {
    format!("Ich habe leider kein passendes GIF zu \"{query}\" gefunden.")
}

const IMAGE_EDIT_NOTICE: &str =
    "Bilder bearbeiten kann ich hier leider nicht. Beschreibt mir gern, was ihr stattdessen wissen wollt!";

/// Markers that make a message with attachments an image-edit request.
static IMAGE_EDIT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(bearbeite|retuschier\w*|übermal\w*|photoshop\w*|edit this|edit the)\b")
        .expect("image edit regex")
});

fn is_image_edit_request(text: &str, image_count: usize) -> bool {
    image_count > 0 && IMAGE_EDIT_MARKERS.is_match(text)
}

static MENTION_PATTERNS: Lazy<Vec<(Provider, Regex)>> = Lazy::new(|| {
    Provider::ALL
        .iter()
        .map(|p| {
            let pattern = format!("(?i){}", regex::escape(p.mention()));
            (*p, Regex::new(&pattern).expect("mention regex"))
        })
        .collect()
});

static LEADING_SELF_MENTION: Lazy<Vec<(Provider, Regex)>> = Lazy::new(|| {
    Provider::ALL
        .iter()
        .map(|p| {
            let pattern = format!(r"(?i)^(?:{}\b[\s,:!]*)+", regex::escape(p.mention()));
            (*p, Regex::new(&pattern).expect("leading mention regex"))
        })
        .collect()
});

/// Providers occasionally open a reply by echoing their own handle; drop
/// leading self-mention tokens before the reply is stored.
fn strip_leading_self_mention(text: &str, provider: Provider) -> String {
    let trimmed = text.trim();
    let stripped = LEADING_SELF_MENTION
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, re)| re.replace(trimmed, "").into_owned())
        .unwrap_or_else(|| trimmed.to_string());
    if stripped.trim().is_empty() {
        trimmed.to_string()
    } else {
        stripped
    }
}

/// Remove the provider's own mention token so the model is not addressed by
/// handle inside its prompt.
fn strip_mention(text: &str, provider: Provider) -> String {
    let stripped = MENTION_PATTERNS
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, re)| re.replace_all(text, " "))
        .unwrap_or_else(|| text.into());
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn system_prompt(provider: Provider) -> String {
    format!(
        "Du bist {name} und Teil eines deutschen Gruppenchats. Antworte in der \
         Sprache der letzten Nachricht, locker und knapp. Wenn jemand eine \
         Abstimmung oder Umfrage möchte, gib genau einen Block \
         <POLL_JSON>{{\"question\":\"...\",\"options\":[\"...\"],\"multiSelect\":false}}</POLL_JSON> \
         mit 2 bis 15 Optionen aus.",
        name = provider.display_name()
    )
}

/// Worker draining the AI response queue.
pub struct AiResponseWorker {
    jobs: Arc<dyn AiJobRepository>,
    tagging_jobs: Arc<dyn TaggingJobRepository>,
    messages: Arc<dyn MessageRepository>,
    lock: Arc<dyn CoordinationLock>,
    events: Arc<EventBus>,
    chatgpt: Arc<dyn ChatProvider>,
    grok: Arc<dyn ChatProvider>,
    gif_search: Arc<dyn GifProvider>,
    media: Arc<dyn MediaFetcher>,
    config: JobsConfig,
}

impl AiResponseWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn AiJobRepository>,
        tagging_jobs: Arc<dyn TaggingJobRepository>,
        messages: Arc<dyn MessageRepository>,
        lock: Arc<dyn CoordinationLock>,
        events: Arc<EventBus>,
        chatgpt: Arc<dyn ChatProvider>,
        grok: Arc<dyn ChatProvider>,
        gif_search: Arc<dyn GifProvider>,
        media: Arc<dyn MediaFetcher>,
        config: JobsConfig,
    ) -> Self {
        Self {
            jobs,
            tagging_jobs,
            messages,
            lock,
            events,
            chatgpt,
            grok,
            gif_search,
            media,
            config,
        }
    }

    /// Drain one batch of the AI response queue.
    ///
    /// Returns a skipped summary without touching any row when another
    /// invocation holds the queue lock.
    pub async fn process_ai_queue(&self) -> Result<QueueRunSummary> {
        if !self.lock.try_acquire(AI_QUEUE_LOCK).await? {
            debug!(
                subsystem = "jobs",
                component = "ai_worker",
                lock = AI_QUEUE_LOCK,
                "Queue lock held elsewhere, skipping drain"
            );
            return Ok(QueueRunSummary::skipped());
        }

        let result = self.drain_batch().await;
        let released = self.lock.release(AI_QUEUE_LOCK).await;
        let summary = result?;
        released?;
        Ok(summary)
    }

    async fn drain_batch(&self) -> Result<QueueRunSummary> {
        let claimed = self.jobs.claim_batch(self.config.batch_size).await?;
        let mut processed = 0;
        for job in &claimed {
            match self.process_job(job).await {
                Ok(()) => processed += 1,
                // A repository error for one job must not strand the rest of
                // the claimed batch in PROCESSING.
                Err(error) => self.recover_job(job, &error).await,
            }
        }
        if processed > 0 {
            info!(
                subsystem = "jobs",
                component = "ai_worker",
                processed,
                "Drained AI response batch"
            );
        }
        Ok(QueueRunSummary {
            processed,
            lock_skipped: false,
        })
    }

    /// Put a job whose processing errored out back on the ladder, or fail it
    /// when the claim already spent its last attempt.
    async fn recover_job(&self, job: &AiJob, error: &Error) {
        warn!(
            subsystem = "jobs",
            component = "ai_worker",
            job_id = %job.id,
            attempts = job.attempts,
            %error,
            "Job processing failed, recovering"
        );
        let recovery = if job.attempts >= job.max_attempts {
            let failed = self.jobs.fail(job.id, &error.to_string()).await;
            if failed.is_ok() {
                self.events.publish(ServerEvent::JobFailed {
                    job_id: job.id,
                    queue: AI_QUEUE_LOCK,
                    error: error.to_string(),
                });
            }
            failed
        } else {
            self.jobs.release_for_retry(job.id, &error.to_string()).await
        };
        if let Err(recovery_error) = recovery {
            warn!(
                subsystem = "jobs",
                component = "ai_worker",
                job_id = %job.id,
                %recovery_error,
                "Failed to recover job after processing error"
            );
        }
    }

    async fn process_job(&self, job: &AiJob) -> Result<()> {
        let Some(provider) = Provider::from_target_key(&job.target_key) else {
            warn!(
                subsystem = "jobs",
                component = "ai_worker",
                job_id = %job.id,
                target = %job.target_key,
                "Unknown provider target, failing job"
            );
            let error = format!("unknown provider target: {}", job.target_key);
            self.jobs.fail(job.id, &error).await?;
            self.events.publish(ServerEvent::JobFailed {
                job_id: job.id,
                queue: AI_QUEUE_LOCK,
                error,
            });
            return Ok(());
        };

        let backend = match provider {
            Provider::ChatGpt => &self.chatgpt,
            Provider::Grok => &self.grok,
        };

        if !backend.is_enabled() {
            return self.fail_disabled(job, provider).await;
        }

        if is_image_edit_request(&job.payload.message, job.payload.image_urls.len()) {
            let message_id = self
                .post_reply(job, provider, IMAGE_EDIT_NOTICE.to_string(), None)
                .await?;
            debug!(
                subsystem = "jobs",
                component = "ai_worker",
                job_id = %job.id,
                %message_id,
                "Answered image-edit request with capability notice"
            );
            return self.finish(job).await;
        }

        if let Some(query) = detect_gif_query(&job.payload.message) {
            return self.process_gif_request(job, provider, &query).await;
        }

        let mode = AttemptMode::for_attempt(job.attempts);
        let request = self.build_request(job, provider, mode).await?;
        match backend.generate(&request).await {
            Ok(text) => self.publish_generation(job, provider, &text).await,
            Err(error) => self.handle_provider_error(job, provider, error).await,
        }
    }

    async fn build_request(
        &self,
        job: &AiJob,
        provider: Provider,
        mode: AttemptMode,
    ) -> Result<GenerationRequest> {
        let history = self
            .messages
            .thread_history(job.source_message_id, mode.history_window())
            .await?;

        let mut turns = vec![ChatTurn::text(Role::System, system_prompt(provider))];
        for ChatLine { author_key, body } in history {
            if author_key == provider.author_key() {
                turns.push(ChatTurn::text(Role::Assistant, body));
            } else {
                turns.push(ChatTurn::text(Role::User, format!("{author_key}: {body}")));
            }
        }

        let question = strip_mention(&job.payload.message, provider);
        let mut content = vec![ContentBlock::Text(format!(
            "{}: {}",
            job.payload.username, question
        ))];
        for url in &job.payload.image_urls {
            content.push(ContentBlock::ImageUrl(url.clone()));
        }
        turns.push(ChatTurn {
            role: Role::User,
            content,
        });

        Ok(GenerationRequest {
            turns,
            degraded_model: mode.degraded_model(),
            json_response: false,
        })
    }

    async fn publish_generation(&self, job: &AiJob, provider: Provider, text: &str) -> Result<()> {
        if let Some(spec) = parse_poll(text) {
            self.post_poll(job, provider, spec).await?;
        } else {
            let body = strip_leading_self_mention(text, provider);
            self.post_reply(job, provider, body, None).await?;
        }
        self.finish(job).await
    }

    async fn process_gif_request(&self, job: &AiJob, provider: Provider, query: &str) -> Result<()> {
        let candidates = match self.gif_search.search(query, GIF_CANDIDATE_LIMIT).await {
            Ok(urls) => urls,
            Err(error) if error.is_retryable() => {
                return self.handle_provider_error(job, provider, error).await;
            }
            Err(error) => {
                debug!(
                    subsystem = "jobs",
                    component = "ai_worker",
                    job_id = %job.id,
                    %error,
                    "GIF search unavailable, falling back to text"
                );
                Vec::new()
            }
        };

        // Candidates are untrusted until fetch-validation passes; take the
        // first real GIF in search order.
        let mut validated = None;
        for url in &candidates {
            match self.media.validate_gif_url(url).await {
                Ok(()) => {
                    validated = Some(url.clone());
                    break;
                }
                Err(error) => {
                    debug!(
                        subsystem = "jobs",
                        component = "ai_worker",
                        job_id = %job.id,
                        url = %url,
                        %error,
                        "GIF candidate rejected"
                    );
                }
            }
        }

        match validated {
            Some(url) => {
                self.post_reply(job, provider, gif_caption(query), Some(url))
                    .await?;
            }
            None => {
                self.post_reply(job, provider, gif_fallback(query), None)
                    .await?;
            }
        }
        self.finish(job).await
    }

    async fn post_poll(&self, job: &AiJob, provider: Provider, spec: PollSpec) -> Result<()> {
        // Polls thread under the conversation root so every participant sees
        // them, not only the reply subtree.
        let root = self.messages.root_ancestor(job.source_message_id).await?;
        let tag_text = format!("{} {}", spec.question, spec.options.join(" "));
        let message = NewBotMessage {
            author_key: provider.author_key().to_string(),
            kind: MessageKind::Poll { spec },
            reply_to_id: Some(root),
            question_message_id: Some(job.source_message_id),
            media_url: None,
        };
        let message_id = self.messages.insert_bot_message(&message).await?;
        self.events.publish(ServerEvent::MessageCreated {
            message_id,
            author_key: provider.author_key().to_string(),
            question_message_id: Some(job.source_message_id),
        });
        self.events
            .publish(ServerEvent::PollUpdated { message_id });
        self.enqueue_tagging(message_id, provider, &tag_text, &[])
            .await?;
        info!(
            subsystem = "jobs",
            component = "ai_worker",
            job_id = %job.id,
            %message_id,
            "Posted poll from provider output"
        );
        Ok(())
    }

    /// Insert a provider-authored reply to the triggering message and chain
    /// a tagging job for it.
    async fn post_reply(
        &self,
        job: &AiJob,
        provider: Provider,
        body: String,
        media_url: Option<String>,
    ) -> Result<Uuid> {
        let image_urls: Vec<String> = media_url.iter().cloned().collect();
        let message = NewBotMessage {
            author_key: provider.author_key().to_string(),
            kind: MessageKind::Text { body: body.clone() },
            reply_to_id: Some(job.source_message_id),
            question_message_id: Some(job.source_message_id),
            media_url,
        };
        let message_id = self.messages.insert_bot_message(&message).await?;
        self.events.publish(ServerEvent::MessageCreated {
            message_id,
            author_key: provider.author_key().to_string(),
            question_message_id: Some(job.source_message_id),
        });
        self.enqueue_tagging(message_id, provider, &body, &image_urls)
            .await?;
        Ok(message_id)
    }

    async fn enqueue_tagging(
        &self,
        message_id: Uuid,
        provider: Provider,
        text: &str,
        image_urls: &[String],
    ) -> Result<()> {
        let payload = TaggingJobPayload {
            username: provider.display_name().to_string(),
            message: text.to_string(),
            image_urls: image_urls.to_vec(),
        };
        self.tagging_jobs
            .enqueue_deduplicated(message_id, &payload)
            .await?;
        Ok(())
    }

    /// System notice to the channel when a job goes terminally wrong.
    async fn post_system_notice(&self, job: &AiJob, body: String) -> Result<()> {
        let message = NewBotMessage {
            author_key: SYSTEM_AUTHOR.to_string(),
            kind: MessageKind::Text { body },
            reply_to_id: Some(job.source_message_id),
            question_message_id: Some(job.source_message_id),
            media_url: None,
        };
        let message_id = self.messages.insert_bot_message(&message).await?;
        self.events.publish(ServerEvent::MessageCreated {
            message_id,
            author_key: SYSTEM_AUTHOR.to_string(),
            question_message_id: Some(job.source_message_id),
        });
        Ok(())
    }

    async fn finish(&self, job: &AiJob) -> Result<()> {
        self.jobs.complete(job.id).await?;
        self.events.publish(ServerEvent::JobCompleted {
            job_id: job.id,
            queue: AI_QUEUE_LOCK,
        });
        Ok(())
    }

    async fn fail_disabled(&self, job: &AiJob, provider: Provider) -> Result<()> {
        warn!(
            subsystem = "jobs",
            component = "ai_worker",
            job_id = %job.id,
            target = provider.target_key(),
            "Provider backend disabled, failing job with notice"
        );
        self.post_system_notice(job, disabled_notice(provider))
            .await?;
        let error = format!("{} backend is disabled", provider.display_name());
        self.jobs.fail(job.id, &error).await?;
        self.events.publish(ServerEvent::JobFailed {
            job_id: job.id,
            queue: AI_QUEUE_LOCK,
            error,
        });
        Ok(())
    }

    async fn handle_provider_error(
        &self,
        job: &AiJob,
        provider: Provider,
        error: ProviderError,
    ) -> Result<()> {
        if matches!(error, ProviderError::Disabled(_)) {
            return self.fail_disabled(job, provider).await;
        }

        // Any other error retries until the attempt budget is spent; the
        // ladder shrinks context and degrades the model on later rungs.
        if job.attempts >= job.max_attempts {
            warn!(
                subsystem = "jobs",
                component = "ai_worker",
                job_id = %job.id,
                attempts = job.attempts,
                %error,
                "Attempts exhausted, failing job"
            );
            self.post_system_notice(job, failure_notice(provider))
                .await?;
            self.jobs.fail(job.id, &error.to_string()).await?;
            self.events.publish(ServerEvent::JobFailed {
                job_id: job.id,
                queue: AI_QUEUE_LOCK,
                error: error.to_string(),
            });
        } else {
            debug!(
                subsystem = "jobs",
                component = "ai_worker",
                job_id = %job.id,
                attempts = job.attempts,
                %error,
                "Releasing job for retry"
            );
            self.jobs
                .release_for_retry(job.id, &error.to_string())
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeMedia, InMemoryAiJobs, InMemoryLock, InMemoryMessages, InMemoryTaggingJobs,
    };
    use stamm_core::{new_v7, AiJobPayload, JobStatus};
    use stamm_inference::{MockChatProvider, MockGifProvider};

    struct Harness {
        worker: AiResponseWorker,
        jobs: Arc<InMemoryAiJobs>,
        tagging_jobs: Arc<InMemoryTaggingJobs>,
        messages: Arc<InMemoryMessages>,
        lock: Arc<InMemoryLock>,
        grok: Arc<MockChatProvider>,
        media: Arc<FakeMedia>,
        events: Arc<EventBus>,
    }

    fn harness_with(
        jobs: Arc<InMemoryAiJobs>,
        grok: Arc<MockChatProvider>,
        gif_search: Arc<MockGifProvider>,
    ) -> Harness {
        let tagging_jobs = Arc::new(InMemoryTaggingJobs::new());
        let messages = Arc::new(InMemoryMessages::new());
        let lock = Arc::new(InMemoryLock::new());
        let media = Arc::new(FakeMedia::new());
        let events = Arc::new(EventBus::new(32));
        let worker = AiResponseWorker::new(
            jobs.clone(),
            tagging_jobs.clone(),
            messages.clone(),
            lock.clone(),
            events.clone(),
            Arc::new(MockChatProvider::new()),
            grok.clone(),
            gif_search,
            media.clone(),
            JobsConfig::default(),
        );
        Harness {
            worker,
            jobs,
            tagging_jobs,
            messages,
            lock,
            grok,
            media,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Arc::new(InMemoryAiJobs::new()),
            Arc::new(MockChatProvider::new()),
            Arc::new(MockGifProvider::with_urls(Vec::new())),
        )
    }

    async fn enqueue(h: &Harness, message: &str) -> (Uuid, Uuid) {
        let source = new_v7();
        let payload = AiJobPayload {
            username: "anna".into(),
            message: message.into(),
            image_urls: Vec::new(),
        };
        let job_id = h
            .jobs
            .enqueue_deduplicated(source, Provider::Grok.target_key(), &payload)
            .await
            .unwrap()
            .unwrap();
        (source, job_id)
    }

    #[test]
    fn mention_stripping_is_case_insensitive() {
        assert_eq!(
            strip_mention("@Grok wie ist das Wetter?", Provider::Grok),
            "wie ist das Wetter?"
        );
        assert_eq!(
            strip_mention("hey @CHATGPT, alles klar?", Provider::ChatGpt),
            "hey , alles klar?"
        );
    }

    #[test]
    fn leading_self_mention_removed_from_reply_text() {
        assert_eq!(
            strip_leading_self_mention("@grok Morgen wird es sonnig!", Provider::Grok),
            "Morgen wird es sonnig!"
        );
        assert_eq!(
            strip_leading_self_mention("@Grok: @grok hallo", Provider::Grok),
            "hallo"
        );
        // Mid-text mentions and other handles stay untouched.
        assert_eq!(
            strip_leading_self_mention("frag doch @grok selbst", Provider::Grok),
            "frag doch @grok selbst"
        );
        assert_eq!(
            strip_leading_self_mention("@chatgpt weiß das besser", Provider::Grok),
            "@chatgpt weiß das besser"
        );
        // A reply that is nothing but the handle is kept rather than emptied.
        assert_eq!(strip_leading_self_mention("@grok", Provider::Grok), "@grok");
    }

    #[test]
    fn image_edit_detection_needs_attachments() {
        assert!(is_image_edit_request("bearbeite das Foto bitte", 1));
        assert!(!is_image_edit_request("bearbeite das Foto bitte", 0));
        assert!(!is_image_edit_request("was ist auf dem Foto?", 1));
    }

    #[tokio::test]
    async fn held_lock_skips_without_claiming() {
        let h = harness();
        enqueue(&h, "@grok hallo").await;
        h.lock.hold_externally(AI_QUEUE_LOCK);

        let summary = h.worker.process_ai_queue().await.unwrap();
        assert!(summary.lock_skipped);
        assert_eq!(summary.processed, 0);
        assert_eq!(h.jobs.queue_stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn generation_posts_reply_and_chains_tagging() {
        let h = harness();
        h.grok.push_reply("Morgen wird es sonnig!");
        let (source, job_id) = enqueue(&h, "@grok wie wird das Wetter?").await;
        let mut rx = h.events.subscribe();

        let summary = h.worker.process_ai_queue().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert!(!summary.lock_skipped);

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let posted = h.messages.bot_messages();
        assert_eq!(posted.len(), 1);
        let (message_id, message) = &posted[0];
        assert_eq!(message.author_key, "bot:grok");
        assert_eq!(message.question_message_id, Some(source));
        assert_eq!(message.reply_to_id, Some(source));
        match &message.kind {
            MessageKind::Text { body } => assert_eq!(body, "Morgen wird es sonnig!"),
            other => panic!("unexpected kind: {other:?}"),
        }

        let tagging = h.tagging_jobs.snapshot();
        assert_eq!(tagging.len(), 1);
        assert_eq!(tagging[0].source_message_id, *message_id);
        assert_eq!(tagging[0].payload.username, "Grok");

        let created = rx.try_recv().unwrap();
        assert!(matches!(created, ServerEvent::MessageCreated { .. }));
        let completed = rx.try_recv().unwrap();
        assert!(matches!(completed, ServerEvent::JobCompleted { .. }));
        // Lock released for the next cycle.
        assert!(!h.lock.is_held(AI_QUEUE_LOCK));
    }

    #[tokio::test]
    async fn generation_strips_own_mention_from_prompt() {
        let h = harness();
        h.grok.push_reply("klar!");
        enqueue(&h, "@grok sag mal hallo").await;

        h.worker.process_ai_queue().await.unwrap();

        let requests = h.grok.requests();
        assert_eq!(requests.len(), 1);
        let last_turn = requests[0].turns.last().unwrap();
        match &last_turn.content[0] {
            ContentBlock::Text(text) => {
                assert!(!text.to_lowercase().contains("@grok"));
                assert!(text.contains("anna"));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reply_opening_with_own_handle_is_stored_clean() {
        let h = harness();
        h.grok.push_reply("@grok Morgen wird es sonnig!");
        enqueue(&h, "@grok wie wird das Wetter?").await;

        h.worker.process_ai_queue().await.unwrap();

        let posted = h.messages.bot_messages();
        assert_eq!(posted.len(), 1);
        match &posted[0].1.kind {
            MessageKind::Text { body } => assert_eq!(body, "Morgen wird es sonnig!"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn storage_error_releases_job_and_batch_continues() {
        let h = harness();
        h.grok.push_reply("erste Antwort");
        h.grok.push_reply("zweite Antwort");
        let (_, first_id) = enqueue(&h, "@grok erste Frage").await;
        let (_, second_id) = enqueue(&h, "@grok zweite Frage").await;
        h.messages.fail_next_insert("db down");

        let summary = h.worker.process_ai_queue().await.unwrap();
        assert_eq!(summary.processed, 1);

        // The failed job is back on the ladder, not stuck in PROCESSING.
        let first = h.jobs.get(first_id).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        assert_eq!(first.attempts, 1);

        let second = h.jobs.get(second_id).await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(h.messages.bot_messages().len(), 1);
        assert!(!h.lock.is_held(AI_QUEUE_LOCK));
    }

    #[tokio::test]
    async fn disabled_backend_fails_job_with_notice() {
        let h = harness_with(
            Arc::new(InMemoryAiJobs::new()),
            Arc::new(MockChatProvider::disabled()),
            Arc::new(MockGifProvider::with_urls(Vec::new())),
        );
        let (_, job_id) = enqueue(&h, "@grok bist du da?").await;

        h.worker.process_ai_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        let posted = h.messages.bot_messages();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].1.author_key, SYSTEM_AUTHOR);
        match &posted[0].1.kind {
            MessageKind::Text { body } => assert!(body.contains("nicht verfügbar")),
            other => panic!("unexpected kind: {other:?}"),
        }
        // Disabled backends never get a tagging chain.
        assert!(h.tagging_jobs.snapshot().is_empty());
    }

    #[tokio::test]
    async fn transient_error_releases_job_for_retry() {
        let h = harness();
        h.grok
            .push(Err(ProviderError::Server("HTTP 503".into())));
        let (_, job_id) = enqueue(&h, "@grok hallo").await;

        h.worker.process_ai_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("provider server error: HTTP 503"));
        assert!(h.messages.bot_messages().is_empty());
    }

    #[tokio::test]
    async fn second_attempt_shrinks_history_window() {
        let h = harness();
        h.grok
            .push(Err(ProviderError::ContextOverflow("too long".into())));
        h.grok.push_reply("kurz und knapp");
        let (source, _) = enqueue(&h, "@grok fass das mal zusammen").await;
        let history: Vec<ChatLine> = (0..10)
            .map(|i| ChatLine {
                author_key: "user:ben".into(),
                body: format!("Nachricht {i}"),
            })
            .collect();
        h.messages.set_history(source, history);

        h.worker.process_ai_queue().await.unwrap();
        h.worker.process_ai_queue().await.unwrap();

        let requests = h.grok.requests();
        assert_eq!(requests.len(), 2);
        // system + history + question
        assert_eq!(
            requests[0].turns.len(),
            1 + stamm_core::defaults::AI_HISTORY_WINDOW + 1
        );
        assert_eq!(
            requests[1].turns.len(),
            1 + stamm_core::defaults::AI_HISTORY_WINDOW_REDUCED + 1
        );
        assert!(!requests[1].degraded_model);
    }

    #[tokio::test]
    async fn third_attempt_degrades_the_model() {
        let h = harness();
        h.grok.push(Err(ProviderError::Server("500".into())));
        h.grok.push(Err(ProviderError::Server("500".into())));
        h.grok.push_reply("jetzt klappt es");
        enqueue(&h, "@grok dritter Versuch").await;

        h.worker.process_ai_queue().await.unwrap();
        h.worker.process_ai_queue().await.unwrap();
        h.worker.process_ai_queue().await.unwrap();

        let requests = h.grok.requests();
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].degraded_model);
        assert!(!requests[1].degraded_model);
        assert!(requests[2].degraded_model);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_with_user_notice() {
        let h = harness_with(
            Arc::new(InMemoryAiJobs::new().with_max_attempts(2)),
            Arc::new(MockChatProvider::new()),
            Arc::new(MockGifProvider::with_urls(Vec::new())),
        );
        h.grok.push(Err(ProviderError::Server("500".into())));
        h.grok.push(Err(ProviderError::Server("500".into())));
        let (_, job_id) = enqueue(&h, "@grok klappt das?").await;

        h.worker.process_ai_queue().await.unwrap();
        h.worker.process_ai_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);

        let posted = h.messages.bot_messages();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].1.author_key, SYSTEM_AUTHOR);
        match &posted[0].1.kind {
            MessageKind::Text { body } => assert!(body.contains("keine Antwort")),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_output_threads_to_conversation_root() {
        let h = harness();
        h.grok.push_reply(
            r#"Gerne! <POLL_JSON>{"question":"Wohin am Samstag?","options":["Biergarten","Kino"]}</POLL_JSON>"#,
        );
        let (source, _) = enqueue(&h, "@grok mach mal eine Umfrage").await;
        let root = new_v7();
        h.messages.set_root(source, root);
        let mut rx = h.events.subscribe();

        h.worker.process_ai_queue().await.unwrap();

        let posted = h.messages.bot_messages();
        assert_eq!(posted.len(), 1);
        let message = &posted[0].1;
        assert_eq!(message.reply_to_id, Some(root));
        assert_eq!(message.question_message_id, Some(source));
        match &message.kind {
            MessageKind::Poll { spec } => {
                assert_eq!(spec.question, "Wohin am Samstag?");
                assert_eq!(spec.options.len(), 2);
            }
            other => panic!("unexpected kind: {other:?}"),
        }

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::MessageCreated { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::PollUpdated { .. }
        ));
    }

    #[tokio::test]
    async fn gif_request_posts_first_validated_candidate() {
        let h = harness_with(
            Arc::new(InMemoryAiJobs::new()),
            Arc::new(MockChatProvider::new()),
            Arc::new(MockGifProvider::with_urls(vec![
                "https://media.example/dead.gif".into(),
                "https://media.example/katze.gif".into(),
            ])),
        );
        // Only the second candidate actually serves a GIF.
        h.media.serve_gif("https://media.example/katze.gif");
        let (_, job_id) = enqueue(&h, "such mir ein gif von katzen raus").await;

        h.worker.process_ai_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let posted = h.messages.bot_messages();
        assert_eq!(posted.len(), 1);
        assert_eq!(
            posted[0].1.media_url.as_deref(),
            Some("https://media.example/katze.gif")
        );
        // No chat request was made for a GIF job.
        assert!(h.grok.requests().is_empty());
    }

    #[tokio::test]
    async fn gif_request_without_valid_candidate_falls_back_to_text() {
        let h = harness_with(
            Arc::new(InMemoryAiJobs::new()),
            Arc::new(MockChatProvider::new()),
            Arc::new(MockGifProvider::with_urls(vec![
                "https://media.example/dead.gif".into(),
            ])),
        );
        let (_, job_id) = enqueue(&h, "send me a gif of confused cats").await;

        h.worker.process_ai_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let posted = h.messages.bot_messages();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].1.media_url.is_none());
        match &posted[0].1.kind {
            MessageKind::Text { body } => assert!(body.contains("kein passendes GIF")),
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
