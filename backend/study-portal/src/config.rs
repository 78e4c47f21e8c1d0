use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::operation::RetryPolicy;

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    pub backend_url: String,
    pub backend_timeout_secs: u64,
    pub jwt_secret: String,
    pub operations: OperationSettings,
    pub session_cache_ttl_secs: u64,
    pub registry_idle_ttl_secs: u64,
}

/// Timings for the hint and chat controllers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OperationSettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub hint_timeout_secs: u64,
    pub chat_timeout_secs: u64,
    /// `None` keeps polling until a result shows up or the widget goes away.
    pub max_poll_secs: Option<u64>,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            poll_interval_ms: 5000,
            hint_timeout_secs: 45,
            chat_timeout_secs: 30,
            max_poll_secs: None,
        }
    }
}

impl OperationSettings {
    pub fn hint_policy(&self) -> RetryPolicy {
        self.policy(self.hint_timeout_secs)
    }

    pub fn chat_policy(&self) -> RetryPolicy {
        self.policy(self.chat_timeout_secs)
    }

    fn policy(&self, timeout_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(timeout_secs),
            max_poll_duration: self.max_poll_secs.map(Duration::from_secs),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the crate-local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let listen_addr = settings
            .get_string("server.listen_addr")
            .or_else(|_| env::var("LISTEN_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let backend_url = settings
            .get_string("backend.url")
            .or_else(|_| env::var("STUDY_BACKEND_URL"))
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let backend_timeout_secs = settings
            .get_int("backend.timeout_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(60);

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .unwrap_or_else(|_| DEV_JWT_SECRET.to_string());

        if app_env == "prod" && jwt_secret == DEV_JWT_SECRET {
            return Err(config::ConfigError::Message(
                "JWT_SECRET must be set in production".to_string(),
            ));
        }

        let operations = settings
            .get::<OperationSettings>("operations")
            .unwrap_or_default();

        let session_cache_ttl_secs = settings
            .get_int("session_cache.ttl_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(3600);

        let registry_idle_ttl_secs = settings
            .get_int("registry.idle_ttl_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(900);

        Ok(Config {
            listen_addr,
            backend_url,
            backend_timeout_secs,
            jwt_secret,
            operations,
            session_cache_ttl_secs,
            registry_idle_ttl_secs,
        })
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_secs)
    }

    pub fn registry_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_idle_ttl_secs)
    }

    /// Fixed configuration for tests; points at a backend that is never dialed.
    pub fn for_tests(backend_url: &str) -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            backend_url: backend_url.to_string(),
            backend_timeout_secs: 5,
            jwt_secret: "test-secret".to_string(),
            operations: OperationSettings::default(),
            session_cache_ttl_secs: 3600,
            registry_idle_ttl_secs: 900,
        }
    }
}
