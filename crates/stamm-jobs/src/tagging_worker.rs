//! Tagging queue worker.
//!
//! Drains the tagging queue under the `tagging_queue` advisory lock. For
//! each job it builds one vision classification request for the source
//! message (GIF attachments flattened into still frames first), runs the
//! model, composes the deterministic payload, and writes it back onto the
//! message. Terminal failures leave the message in a failed-with-reason
//! tagging state, never pending.

use std::sync::Arc;

use tracing::{debug, info, warn};

use stamm_core::defaults::{GIF_FRAME_COUNT, TAGGING_QUEUE_LOCK};
use stamm_core::{
    CoordinationLock, Error, EventBus, MessageRepository, QueueRunSummary, Result, ServerEvent,
    TaggingJob, TaggingJobRepository,
};
use stamm_inference::{
    extract_representative_frames, png_data_url, ChatTurn, ContentBlock, GenerationRequest,
    ProviderError, Role, VisionProvider,
};

use crate::compose::{compose_payload, parse_classification};
use crate::config::JobsConfig;
use crate::media::MediaFetcher;

const CLASSIFY_PROMPT: &str = "Du klassifizierst Chatnachrichten für ein deutsches Gruppenchat-Archiv. \
Antworte ausschließlich mit einem JSON-Objekt dieser Form: \
{\"tags\":[{\"tag\":\"...\",\"score\":0.0}],\
\"categories\":{\"themes\":[],\"humor\":[],\"art\":[],\"tone\":[],\"topics\":[]},\
\"images\":[{\"url\":\"...\",\"tags\":[],\
\"categories\":{\"themes\":[],\"humor\":[],\"art\":[],\"tone\":[],\"objects\":[]}}]}. \
Tags sind kurze, kleingeschriebene Inhaltsbegriffe (deutsch oder englisch) mit \
Scores zwischen 0 und 1. Beschreibe den Inhalt, nie die Interaktion.";

/// Worker draining the tagging queue.
pub struct TaggingWorker {
    jobs: Arc<dyn TaggingJobRepository>,
    messages: Arc<dyn MessageRepository>,
    lock: Arc<dyn CoordinationLock>,
    events: Arc<EventBus>,
    vision: Arc<dyn VisionProvider>,
    media: Arc<dyn MediaFetcher>,
    config: JobsConfig,
}

impl TaggingWorker {
    pub fn new(
        jobs: Arc<dyn TaggingJobRepository>,
        messages: Arc<dyn MessageRepository>,
        lock: Arc<dyn CoordinationLock>,
        events: Arc<EventBus>,
        vision: Arc<dyn VisionProvider>,
        media: Arc<dyn MediaFetcher>,
        config: JobsConfig,
    ) -> Self {
        Self {
            jobs,
            messages,
            lock,
            events,
            vision,
            media,
            config,
        }
    }

    /// Drain one batch of the tagging queue.
    pub async fn process_tagging_queue(&self) -> Result<QueueRunSummary> {
        if !self.lock.try_acquire(TAGGING_QUEUE_LOCK).await? {
            debug!(
                subsystem = "jobs",
                component = "tagging_worker",
                lock = TAGGING_QUEUE_LOCK,
                "Queue lock held elsewhere, skipping drain"
            );
            return Ok(QueueRunSummary::skipped());
        }

        let result = self.drain_batch().await;
        let released = self.lock.release(TAGGING_QUEUE_LOCK).await;
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
                component = "tagging_worker",
                processed,
                "Drained tagging batch"
            );
        }
        Ok(QueueRunSummary {
            processed,
            lock_skipped: false,
        })
    }

    async fn process_job(&self, job: &TaggingJob) -> Result<()> {
        match self
            .messages
            .mark_tagging_processing(job.source_message_id)
            .await
        {
            Ok(()) => {}
            Err(Error::MessageNotFound(_)) => {
                // The message was deleted after enqueue; nothing to tag.
                let error = format!("source message {} no longer exists", job.source_message_id);
                self.jobs.fail(job.id, &error).await?;
                self.events.publish(ServerEvent::JobFailed {
                    job_id: job.id,
                    queue: TAGGING_QUEUE_LOCK,
                    error,
                });
                return Ok(());
            }
            Err(other) => return Err(other),
        }

        let request = self.build_request(job).await;
        let outcome = match self.vision.classify(&request).await {
            Ok(raw) => parse_classification(&raw)
                .map_err(|e| ProviderError::Other(e.to_string())),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(raw) => {
                let payload =
                    compose_payload(&job.payload.message, &job.payload.image_urls, &raw);
                self.messages
                    .write_tagging(job.source_message_id, &payload)
                    .await?;
                self.jobs.complete(job.id).await?;
                self.events.publish(ServerEvent::MessageUpdated {
                    message_id: job.source_message_id,
                });
                self.events.publish(ServerEvent::JobCompleted {
                    job_id: job.id,
                    queue: TAGGING_QUEUE_LOCK,
                });
                info!(
                    subsystem = "jobs",
                    component = "tagging_worker",
                    job_id = %job.id,
                    message_id = %job.source_message_id,
                    tags = payload.tags.len(),
                    "Tagging written"
                );
                Ok(())
            }
            Err(error) => self.handle_failure(job, error).await,
        }
    }

    /// One classification request for the message text plus all attachments.
    ///
    /// GIF attachments are flattened into representative still frames; any
    /// attachment that cannot be fetched or decoded is passed through as a
    /// plain URL block and left to the provider.
    async fn build_request(&self, job: &TaggingJob) -> GenerationRequest {
        let mut content = vec![ContentBlock::Text(format!(
            "Nachricht von {}: {}",
            job.payload.username, job.payload.message
        ))];

        for url in &job.payload.image_urls {
            match self.media.fetch_gif(url).await {
                Ok(bytes) => match extract_representative_frames(&bytes, GIF_FRAME_COUNT) {
                    Ok(frames) => {
                        debug!(
                            subsystem = "jobs",
                            component = "tagging_worker",
                            job_id = %job.id,
                            url = %url,
                            frames = frames.len(),
                            "Flattened GIF attachment into frames"
                        );
                        for frame in frames {
                            content.push(ContentBlock::ImageUrl(png_data_url(&frame)));
                        }
                    }
                    Err(error) => {
                        debug!(
                            subsystem = "jobs",
                            component = "tagging_worker",
                            job_id = %job.id,
                            url = %url,
                            %error,
                            "Frame extraction failed, passing URL through"
                        );
                        content.push(ContentBlock::ImageUrl(url.clone()));
                    }
                },
                Err(_) => content.push(ContentBlock::ImageUrl(url.clone())),
            }
        }

        GenerationRequest {
            turns: vec![
                ChatTurn::text(Role::System, CLASSIFY_PROMPT),
                ChatTurn { role: Role::User, content },
            ],
            degraded_model: false,
            json_response: true,
        }
    }

    /// Put a job whose processing errored out back on the ladder, or fail it
    /// when the claim already spent its last attempt.
    async fn recover_job(&self, job: &TaggingJob, error: &Error) {
        warn!(
            subsystem = "jobs",
            component = "tagging_worker",
            job_id = %job.id,
            attempts = job.attempts,
            %error,
            "Job processing failed, recovering"
        );
        let recovery = if job.attempts >= job.max_attempts {
            let failed = self.jobs.fail(job.id, &error.to_string()).await;
            if failed.is_ok() {
                if let Err(mark_error) = self
                    .messages
                    .mark_tagging_failed(job.source_message_id, &error.to_string())
                    .await
                {
                    warn!(
                        subsystem = "jobs",
                        component = "tagging_worker",
                        job_id = %job.id,
                        message_id = %job.source_message_id,
                        %mark_error,
                        "Failed to record tagging failure on message"
                    );
                }
                self.events.publish(ServerEvent::MessageUpdated {
                    message_id: job.source_message_id,
                });
                self.events.publish(ServerEvent::JobFailed {
                    job_id: job.id,
                    queue: TAGGING_QUEUE_LOCK,
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
                component = "tagging_worker",
                job_id = %job.id,
                %recovery_error,
                "Failed to recover job after processing error"
            );
        }
    }

    async fn handle_failure(&self, job: &TaggingJob, error: ProviderError) -> Result<()> {
        let terminal =
            matches!(error, ProviderError::Disabled(_)) || job.attempts >= job.max_attempts;

        if terminal {
            warn!(
                subsystem = "jobs",
                component = "tagging_worker",
                job_id = %job.id,
                message_id = %job.source_message_id,
                attempts = job.attempts,
                %error,
                "Tagging failed terminally"
            );
            self.messages
                .mark_tagging_failed(job.source_message_id, &error.to_string())
                .await?;
            self.jobs.fail(job.id, &error.to_string()).await?;
            self.events.publish(ServerEvent::MessageUpdated {
                message_id: job.source_message_id,
            });
            self.events.publish(ServerEvent::JobFailed {
                job_id: job.id,
                queue: TAGGING_QUEUE_LOCK,
                error: error.to_string(),
            });
        } else {
            debug!(
                subsystem = "jobs",
                component = "tagging_worker",
                job_id = %job.id,
                attempts = job.attempts,
                %error,
                "Releasing tagging job for retry"
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
    use crate::testing::{FakeMedia, InMemoryLock, InMemoryMessages, InMemoryTaggingJobs};
    use stamm_core::{new_v7, JobStatus, TaggingJobPayload, TaggingStatus};
    use stamm_inference::MockVisionProvider;
    use uuid::Uuid;

    struct Harness {
        worker: TaggingWorker,
        jobs: Arc<InMemoryTaggingJobs>,
        messages: Arc<InMemoryMessages>,
        lock: Arc<InMemoryLock>,
        vision: Arc<MockVisionProvider>,
        media: Arc<FakeMedia>,
        events: Arc<EventBus>,
    }

    fn harness_with(jobs: Arc<InMemoryTaggingJobs>) -> Harness {
        let messages = Arc::new(InMemoryMessages::new());
        let lock = Arc::new(InMemoryLock::new());
        let vision = Arc::new(MockVisionProvider::new());
        let media = Arc::new(FakeMedia::new());
        let events = Arc::new(EventBus::new(32));
        let worker = TaggingWorker::new(
            jobs.clone(),
            messages.clone(),
            lock.clone(),
            events.clone(),
            vision.clone(),
            media.clone(),
            JobsConfig::default(),
        );
        Harness {
            worker,
            jobs,
            messages,
            lock,
            vision,
            media,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryTaggingJobs::new()))
    }

    async fn enqueue(h: &Harness, message: &str, image_urls: Vec<String>) -> (Uuid, Uuid) {
        let source = new_v7();
        let payload = TaggingJobPayload {
            username: "anna".into(),
            message: message.into(),
            image_urls,
        };
        let job_id = h
            .jobs
            .enqueue_deduplicated(source, &payload)
            .await
            .unwrap()
            .unwrap();
        (source, job_id)
    }

    fn animated_gif(frame_count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = image::codecs::gif::GifEncoder::new(&mut bytes);
            for i in 0..frame_count {
                let shade = (i * 40) as u8;
                let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([shade, 0, 0, 255]));
                encoder.encode_frame(image::Frame::new(img)).unwrap();
            }
        }
        bytes
    }

    #[tokio::test]
    async fn held_lock_skips_without_claiming() {
        let h = harness();
        enqueue(&h, "hallo", Vec::new()).await;
        h.lock.hold_externally(TAGGING_QUEUE_LOCK);

        let summary = h.worker.process_tagging_queue().await.unwrap();
        assert!(summary.lock_skipped);
        assert_eq!(h.jobs.queue_stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn classification_written_onto_message() {
        let h = harness();
        h.vision.push_json(
            r#"{"tags":[{"tag":"Wetter","score":0.9},{"tag":"smalltalk","score":0.3}]}"#,
        );
        let (source, job_id) = enqueue(&h, "Wie wird das Wetter morgen?", Vec::new()).await;
        let mut rx = h.events.subscribe();

        let summary = h.worker.process_tagging_queue().await.unwrap();
        assert_eq!(summary.processed, 1);

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.messages.tagging_status(source), Some(TaggingStatus::Completed));

        let payload = h.messages.tagging_payload(source).unwrap();
        // Below-floor tag filtered, the rest normalized.
        assert_eq!(payload.tags.len(), 1);
        assert_eq!(payload.tags[0].tag, "wetter");
        // Synthetic tone signals always land.
        assert!(payload
            .categories
            .tone
            .iter()
            .any(|t| t.tag.starts_with("sprache:")));

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::MessageUpdated { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::JobCompleted { .. }
        ));
        assert!(!h.lock.is_held(TAGGING_QUEUE_LOCK));
    }

    #[tokio::test]
    async fn gif_attachment_flattened_into_frames() {
        let h = harness();
        h.media
            .serve("https://media.example/katze.gif", animated_gif(6));
        h.vision.push_json(r#"{"tags":[]}"#);
        enqueue(
            &h,
            "guckt mal",
            vec!["https://media.example/katze.gif".into()],
        )
        .await;

        h.worker.process_tagging_queue().await.unwrap();

        let requests = h.vision.requests();
        assert_eq!(requests.len(), 1);
        let user_turn = requests[0].turns.last().unwrap();
        let data_urls = user_turn
            .content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ImageUrl(u) if u.starts_with("data:image/png;base64,")))
            .count();
        assert_eq!(data_urls, GIF_FRAME_COUNT);
        assert!(requests[0].json_response);
    }

    #[tokio::test]
    async fn unfetchable_attachment_passed_through_as_url() {
        let h = harness();
        h.vision.push_json(r#"{"tags":[]}"#);
        enqueue(
            &h,
            "schaut euch das an",
            vec!["https://media.example/tot.gif".into()],
        )
        .await;

        h.worker.process_tagging_queue().await.unwrap();

        let requests = h.vision.requests();
        let user_turn = requests[0].turns.last().unwrap();
        assert!(user_turn.content.iter().any(
            |b| matches!(b, ContentBlock::ImageUrl(u) if u == "https://media.example/tot.gif")
        ));
    }

    #[tokio::test]
    async fn transient_failure_releases_for_retry() {
        let h = harness();
        h.vision
            .push(Err(ProviderError::Server("HTTP 502".into())));
        let (source, job_id) = enqueue(&h, "hallo", Vec::new()).await;

        h.worker.process_tagging_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        // Not terminal yet, so no failed state on the message.
        assert_eq!(h.messages.tagging_status(source), Some(TaggingStatus::Processing));
    }

    #[tokio::test]
    async fn malformed_json_is_retried_not_fatal() {
        let h = harness();
        h.vision.push_json("ich bin gar kein JSON");
        h.vision.push_json(r#"{"tags":[{"tag":"wetter","score":0.8}]}"#);
        let (source, job_id) = enqueue(&h, "hallo", Vec::new()).await;

        h.worker.process_tagging_queue().await.unwrap();
        h.worker.process_tagging_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.messages.tagging_status(source), Some(TaggingStatus::Completed));
    }

    #[tokio::test]
    async fn exhausted_attempts_mark_message_failed_with_reason() {
        let h = harness_with(Arc::new(InMemoryTaggingJobs::new().with_max_attempts(2)));
        h.vision.push(Err(ProviderError::Server("500".into())));
        h.vision.push(Err(ProviderError::Server("500".into())));
        let (source, job_id) = enqueue(&h, "hallo", Vec::new()).await;
        let mut rx = h.events.subscribe();

        h.worker.process_tagging_queue().await.unwrap();
        h.worker.process_tagging_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(h.messages.tagging_status(source), Some(TaggingStatus::Failed));
        assert!(h.messages.tagging_error(source).unwrap().contains("500"));

        // Second run publishes the terminal pair.
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::MessageUpdated { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::JobFailed { .. }
        ));
    }

    #[tokio::test]
    async fn storage_error_releases_job_and_batch_continues() {
        let h = harness();
        h.vision.push_json(r#"{"tags":[{"tag":"wetter","score":0.9}]}"#);
        h.vision.push_json(r#"{"tags":[{"tag":"katze","score":0.9}]}"#);
        let (first_source, first_job) = enqueue(&h, "wie wird das Wetter?", Vec::new()).await;
        let (second_source, second_job) = enqueue(&h, "meine Katze schläft", Vec::new()).await;
        h.messages.fail_next_write("db down");

        let summary = h.worker.process_tagging_queue().await.unwrap();

        // The first job's write failed, but the second one still ran.
        assert_eq!(summary.processed, 1);
        let first = h.jobs.get(first_job).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        assert_eq!(first.attempts, 1);
        assert_eq!(
            h.messages.tagging_status(first_source),
            Some(TaggingStatus::Processing)
        );
        let second = h.jobs.get(second_job).await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(
            h.messages.tagging_status(second_source),
            Some(TaggingStatus::Completed)
        );
        assert!(!h.lock.is_held(TAGGING_QUEUE_LOCK));
    }

    #[tokio::test]
    async fn disabled_vision_fails_terminally() {
        let h = harness();
        h.vision
            .push(Err(ProviderError::Disabled("kein Schlüssel".into())));
        let (source, job_id) = enqueue(&h, "hallo", Vec::new()).await;

        h.worker.process_tagging_queue().await.unwrap();

        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(h.messages.tagging_status(source), Some(TaggingStatus::Failed));
    }
}
