use std::sync::Arc;

use crate::config::Config;
use crate::middlewares::auth::JwtService;

use backend_client::{HttpStudyBackend, StudyBackend};
use chat_service::ChatService;
use hint_service::HintService;
use mastery_service::MasteryService;
use session_cache::SessionRegistrationCache;

pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn StudyBackend>,
    pub hints: HintService,
    pub chat: ChatService,
    pub mastery: MasteryService,
    pub sessions: SessionRegistrationCache,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        tracing::info!("Using study backend at {}", config.backend_url);

        let backend = HttpStudyBackend::new(&config.backend_url, config.backend_timeout())?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Wires every service around an already built backend.
    pub fn with_backend(config: Config, backend: Arc<dyn StudyBackend>) -> Self {
        let hints = HintService::new(backend.clone(), config.operations.hint_policy());
        let chat = ChatService::new(backend.clone(), config.operations.chat_policy());
        let mastery = MasteryService::new(backend.clone());
        let sessions = SessionRegistrationCache::new(backend.clone(), config.session_cache_ttl());
        let jwt = JwtService::new(&config.jwt_secret);

        Self {
            config,
            backend,
            hints,
            chat,
            mastery,
            sessions,
            jwt,
        }
    }

    /// Evicts idle controllers and expired session entries. Run periodically.
    pub async fn sweep(&self) -> usize {
        let ttl = self.config.registry_idle_ttl();
        let hints = self.hints.registry().evict_idle(ttl).await;
        let chat = self.chat.registry().evict_idle(ttl).await;
        let sessions = self.sessions.purge_expired().await;
        hints + chat + sessions
    }
}

pub mod backend_client;
pub mod chat_service;
pub mod controller;
pub mod hint_service;
pub mod mastery_aggregator;
pub mod mastery_service;
pub mod operations;
pub mod registry;
pub mod session_cache;
