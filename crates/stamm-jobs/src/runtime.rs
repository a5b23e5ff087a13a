//! Production wiring of the job subsystem against Postgres and the real
//! provider backends.
//!
//! Everything configurable comes from the environment; a missing provider
//! API key yields a disabled backend whose jobs fail gracefully with a
//! notice, never a startup error.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use stamm_core::{
    AiJobRepository, CoordinationLock, EventBus, MemberRepository, MessageRepository, Provider,
    TaggingJobRepository, TasteRepository,
};
use stamm_db::{
    PgAiJobRepository, PgCoordinationLock, PgMemberRepository, PgMessageRepository,
    PgTaggingJobRepository, PgTasteRepository,
};
use stamm_inference::{
    ChatProvider, GifProvider, MediaClient, OpenAiCompatBackend, TenorGifClient, VisionProvider,
};

use crate::ai_worker::AiResponseWorker;
use crate::config::JobsConfig;
use crate::enqueue::EnqueueHooks;
use crate::media::MediaFetcher;
use crate::progress::ProgressService;
use crate::tagging_worker::TaggingWorker;

/// Fully wired job subsystem.
pub struct JobRuntime {
    pub enqueue: EnqueueHooks,
    pub ai_worker: AiResponseWorker,
    pub tagging_worker: TaggingWorker,
    pub progress: ProgressService,
    pub events: Arc<EventBus>,
}

impl JobRuntime {
    /// Wire the subsystem against a Postgres pool, reading all tunables and
    /// provider credentials from the environment.
    pub fn from_env(pool: PgPool) -> Self {
        // Load a local .env if present; real environments set vars directly.
        dotenvy::dotenv().ok();

        let config = JobsConfig::from_env();
        let events = Arc::new(EventBus::default());

        let ai_jobs: Arc<dyn AiJobRepository> = Arc::new(
            PgAiJobRepository::new(pool.clone()).with_max_attempts(config.max_attempts),
        );
        let tagging_jobs: Arc<dyn TaggingJobRepository> = Arc::new(
            PgTaggingJobRepository::new(pool.clone()).with_max_attempts(config.max_attempts),
        );
        let messages: Arc<dyn MessageRepository> =
            Arc::new(PgMessageRepository::new(pool.clone()));
        let taste: Arc<dyn TasteRepository> = Arc::new(PgTasteRepository::new(pool.clone()));
        let members: Arc<dyn MemberRepository> = Arc::new(PgMemberRepository::new(pool.clone()));
        let lock: Arc<dyn CoordinationLock> = Arc::new(PgCoordinationLock::new(pool));

        // One backend per target; ChatGPT doubles as the vision model.
        let chatgpt_backend = Arc::new(OpenAiCompatBackend::from_env(Provider::ChatGpt));
        let chatgpt: Arc<dyn ChatProvider> = chatgpt_backend.clone();
        let vision: Arc<dyn VisionProvider> = chatgpt_backend;
        let grok: Arc<dyn ChatProvider> = Arc::new(OpenAiCompatBackend::from_env(Provider::Grok));
        let gif_search: Arc<dyn GifProvider> = Arc::new(TenorGifClient::from_env());
        let media: Arc<dyn MediaFetcher> = Arc::new(MediaClient::new());

        info!(
            subsystem = "jobs",
            component = "runtime",
            chatgpt_enabled = chatgpt.is_enabled(),
            grok_enabled = grok.is_enabled(),
            gif_enabled = gif_search.is_enabled(),
            "Job runtime wired"
        );

        let enqueue = EnqueueHooks::new(
            ai_jobs.clone(),
            tagging_jobs.clone(),
            messages.clone(),
            events.clone(),
            config.clone(),
        );
        let ai_worker = AiResponseWorker::new(
            ai_jobs,
            tagging_jobs.clone(),
            messages.clone(),
            lock.clone(),
            events.clone(),
            chatgpt,
            grok,
            gif_search,
            media.clone(),
            config.clone(),
        );
        let tagging_worker = TaggingWorker::new(
            tagging_jobs,
            messages,
            lock,
            events.clone(),
            vision,
            media,
            config,
        );
        let progress = ProgressService::new(members, taste, events.clone());

        Self {
            enqueue,
            ai_worker,
            tagging_worker,
            progress,
            events,
        }
    }
}
