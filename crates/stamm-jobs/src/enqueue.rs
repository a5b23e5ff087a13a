//! Enqueue hooks invoked when a user message arrives.
//!
//! Scans the message for provider mentions, applies per-target admission
//! control, enqueues deduplicated AI response jobs, and always enqueues one
//! tagging job for the message itself. All writes are at-most-once: the
//! dedup guard in the repositories absorbs double delivery of the same
//! message event.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use stamm_core::{
    AiJobPayload, AiJobRepository, EventBus, MessageKind, MessageRepository, NewBotMessage,
    Provider, Result, ServerEvent, TaggingJobPayload, TaggingJobRepository,
};

use crate::config::JobsConfig;

/// Author key for system notices (busy, disabled, failure).
pub const SYSTEM_AUTHOR: &str = "bot:system";

/// User-visible notice posted instead of a job when a target's queue is full.
pub(crate) fn busy_notice(provider: Provider) -> String {
    format!(
        "{} hat gerade zu viele offene Anfragen. Bitte versucht es in ein paar Minuten nochmal.",
        provider.display_name()
    )
}

/// What happened to one user message at enqueue time.
#[derive(Debug, Default)]
pub struct EnqueueOutcome {
    /// Ids of the AI response jobs actually inserted.
    pub ai_jobs: Vec<Uuid>,
    /// Providers that were mentioned but rejected by admission control.
    pub busy_targets: Vec<Provider>,
    /// Id of the tagging job, unless deduplicated away.
    pub tagging_job: Option<Uuid>,
}

/// Find every provider whose mention token occurs in the text.
///
/// Matching is case-insensitive; `@ChatGPT` and `@chatgpt` are the same
/// mention. Order follows [`Provider::ALL`], not text position.
pub fn scan_mentions(text: &str) -> Vec<Provider> {
    let lowered = text.to_lowercase();
    Provider::ALL
        .into_iter()
        .filter(|p| lowered.contains(p.mention()))
        .collect()
}

/// Entry point wired into the message-creation path.
pub struct EnqueueHooks {
    ai_jobs: Arc<dyn AiJobRepository>,
    tagging_jobs: Arc<dyn TaggingJobRepository>,
    messages: Arc<dyn MessageRepository>,
    events: Arc<EventBus>,
    config: JobsConfig,
}

impl EnqueueHooks {
    pub fn new(
        ai_jobs: Arc<dyn AiJobRepository>,
        tagging_jobs: Arc<dyn TaggingJobRepository>,
        messages: Arc<dyn MessageRepository>,
        events: Arc<EventBus>,
        config: JobsConfig,
    ) -> Self {
        Self {
            ai_jobs,
            tagging_jobs,
            messages,
            events,
            config,
        }
    }

    /// Handle a newly created user message.
    ///
    /// Never generates inline: every mention becomes either a queued job or
    /// an immediate busy notice. The tagging job is enqueued for every
    /// message, mentions or not.
    pub async fn handle_new_user_message(
        &self,
        message_id: Uuid,
        username: &str,
        text: &str,
        image_urls: &[String],
    ) -> Result<EnqueueOutcome> {
        let mut outcome = EnqueueOutcome::default();

        for provider in scan_mentions(text) {
            let active = self
                .ai_jobs
                .active_count_for_target(provider.target_key())
                .await?;
            if active >= self.config.ai_queue_ceiling {
                warn!(
                    subsystem = "jobs",
                    component = "enqueue",
                    target = provider.target_key(),
                    active,
                    ceiling = self.config.ai_queue_ceiling,
                    "AI queue ceiling reached, posting busy notice"
                );
                self.post_busy_notice(message_id, provider).await?;
                outcome.busy_targets.push(provider);
                continue;
            }

            let payload = AiJobPayload {
                username: username.to_string(),
                message: text.to_string(),
                image_urls: image_urls.to_vec(),
            };
            match self
                .ai_jobs
                .enqueue_deduplicated(message_id, provider.target_key(), &payload)
                .await?
            {
                Some(job_id) => {
                    info!(
                        subsystem = "jobs",
                        component = "enqueue",
                        %job_id,
                        %message_id,
                        target = provider.target_key(),
                        "Enqueued AI response job"
                    );
                    outcome.ai_jobs.push(job_id);
                }
                None => {
                    debug!(
                        subsystem = "jobs",
                        component = "enqueue",
                        %message_id,
                        target = provider.target_key(),
                        "AI response job deduplicated"
                    );
                }
            }
        }

        let tagging_payload = TaggingJobPayload {
            username: username.to_string(),
            message: text.to_string(),
            image_urls: image_urls.to_vec(),
        };
        outcome.tagging_job = self
            .tagging_jobs
            .enqueue_deduplicated(message_id, &tagging_payload)
            .await?;
        if let Some(job_id) = outcome.tagging_job {
            debug!(
                subsystem = "jobs",
                component = "enqueue",
                %job_id,
                %message_id,
                "Enqueued tagging job"
            );
        }

        Ok(outcome)
    }

    async fn post_busy_notice(&self, message_id: Uuid, provider: Provider) -> Result<()> {
        let notice = NewBotMessage {
            author_key: SYSTEM_AUTHOR.to_string(),
            kind: MessageKind::Text {
                body: busy_notice(provider),
            },
            reply_to_id: Some(message_id),
            question_message_id: Some(message_id),
            media_url: None,
        };
        let notice_id = self.messages.insert_bot_message(&notice).await?;
        self.events.publish(ServerEvent::MessageCreated {
            message_id: notice_id,
            author_key: SYSTEM_AUTHOR.to_string(),
            question_message_id: Some(message_id),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryAiJobs, InMemoryMessages, InMemoryTaggingJobs};
    use stamm_core::new_v7;

    fn hooks(
        config: JobsConfig,
    ) -> (
        EnqueueHooks,
        Arc<InMemoryAiJobs>,
        Arc<InMemoryTaggingJobs>,
        Arc<InMemoryMessages>,
    ) {
        let ai_jobs = Arc::new(InMemoryAiJobs::new());
        let tagging_jobs = Arc::new(InMemoryTaggingJobs::new());
        let messages = Arc::new(InMemoryMessages::new());
        let hooks = EnqueueHooks::new(
            ai_jobs.clone(),
            tagging_jobs.clone(),
            messages.clone(),
            Arc::new(EventBus::new(32)),
            config,
        );
        (hooks, ai_jobs, tagging_jobs, messages)
    }

    #[test]
    fn mention_scan_is_case_insensitive() {
        assert_eq!(scan_mentions("@Grok wie ist das Wetter?"), vec![Provider::Grok]);
        assert_eq!(scan_mentions("@CHATGPT hilf mal"), vec![Provider::ChatGpt]);
        assert!(scan_mentions("ganz normale nachricht").is_empty());
    }

    #[test]
    fn mention_scan_finds_both_providers() {
        let found = scan_mentions("@chatgpt und @grok, was meint ihr?");
        assert_eq!(found, vec![Provider::ChatGpt, Provider::Grok]);
    }

    #[tokio::test]
    async fn mention_enqueues_ai_and_tagging_jobs() {
        let (hooks, ai_jobs, _, _) = hooks(JobsConfig::default());
        let message_id = new_v7();

        let outcome = hooks
            .handle_new_user_message(message_id, "anna", "@grok wie wird das Wetter?", &[])
            .await
            .unwrap();

        assert_eq!(outcome.ai_jobs.len(), 1);
        assert!(outcome.tagging_job.is_some());
        assert!(outcome.busy_targets.is_empty());

        let job = ai_jobs.get(outcome.ai_jobs[0]).await.unwrap().unwrap();
        assert_eq!(job.target_key, "provider:grok");
        assert_eq!(job.payload.username, "anna");
    }

    #[tokio::test]
    async fn double_delivery_is_deduplicated() {
        let (hooks, _, _, _) = hooks(JobsConfig::default());
        let message_id = new_v7();

        let first = hooks
            .handle_new_user_message(message_id, "anna", "@grok hallo", &[])
            .await
            .unwrap();
        let second = hooks
            .handle_new_user_message(message_id, "anna", "@grok hallo", &[])
            .await
            .unwrap();

        assert_eq!(first.ai_jobs.len(), 1);
        assert!(second.ai_jobs.is_empty());
        assert!(first.tagging_job.is_some());
        assert!(second.tagging_job.is_none());
    }

    #[tokio::test]
    async fn dual_mention_fans_out_to_both_targets() {
        let (hooks, ai_jobs, _, _) = hooks(JobsConfig::default());
        let message_id = new_v7();

        let outcome = hooks
            .handle_new_user_message(message_id, "ben", "@chatgpt @grok was haltet ihr davon?", &[])
            .await
            .unwrap();

        assert_eq!(outcome.ai_jobs.len(), 2);
        let stats = ai_jobs.queue_stats().await.unwrap();
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn full_queue_posts_busy_notice_instead_of_job() {
        let config = JobsConfig {
            ai_queue_ceiling: 1,
            ..JobsConfig::default()
        };
        let (hooks, _, _, messages) = hooks(config);

        hooks
            .handle_new_user_message(new_v7(), "anna", "@grok erste Frage", &[])
            .await
            .unwrap();
        let message_id = new_v7();
        let outcome = hooks
            .handle_new_user_message(message_id, "ben", "@grok zweite Frage", &[])
            .await
            .unwrap();

        assert!(outcome.ai_jobs.is_empty());
        assert_eq!(outcome.busy_targets, vec![Provider::Grok]);
        // Tagging is unaffected by AI admission control.
        assert!(outcome.tagging_job.is_some());

        let posted = messages.bot_messages();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].1.author_key, SYSTEM_AUTHOR);
        assert_eq!(posted[0].1.question_message_id, Some(message_id));
        match &posted[0].1.kind {
            MessageKind::Text { body } => assert!(body.contains("Grok")),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_message_gets_only_a_tagging_job() {
        let (hooks, ai_jobs, tagging_jobs, _) = hooks(JobsConfig::default());

        let outcome = hooks
            .handle_new_user_message(new_v7(), "anna", "schönes Wochenende allerseits", &[])
            .await
            .unwrap();

        assert!(outcome.ai_jobs.is_empty());
        assert!(outcome.tagging_job.is_some());
        assert_eq!(ai_jobs.queue_stats().await.unwrap().total, 0);
        assert_eq!(tagging_jobs.queue_stats().await.unwrap().total, 1);
    }
}
