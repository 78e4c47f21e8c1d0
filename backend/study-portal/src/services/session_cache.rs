use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::metrics::{record_session_cache_hit, record_session_cache_miss};
use crate::models::EnsureUserRequest;
use crate::services::backend_client::StudyBackend;

/// Remembers which sessions already had their user registered upstream, so
/// `POST /users/ensure` runs once per session rather than once per request.
pub struct SessionRegistrationCache {
    backend: Arc<dyn StudyBackend>,
    ttl: Duration,
    entries: RwLock<HashMap<String, Instant>>,
}

impl SessionRegistrationCache {
    pub fn new(backend: Arc<dyn StudyBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cache key for a session: the `sid` claim when the identity provider
    /// sets one, otherwise a digest of the token itself.
    pub fn session_key(token: &str, sid: Option<&str>) -> String {
        match sid.filter(|s| !s.is_empty()) {
            Some(sid) => format!("sid:{}", sid),
            None => format!("tok:{}", hex::encode(Sha256::digest(token.as_bytes()))),
        }
    }

    pub async fn is_registered(&self, key: &str) -> bool {
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// Registers the user upstream unless this session already did.
    /// Returns whether the session is now known to be registered; a failed
    /// registration is not cached so the next request retries it.
    pub async fn ensure(&self, key: &str, token: &str, user: &EnsureUserRequest) -> bool {
        if self.is_registered(key).await {
            record_session_cache_hit();
            return true;
        }
        record_session_cache_miss();

        match self.backend.ensure_user(token, user).await {
            Ok(()) => {
                self.entries
                    .write()
                    .await
                    .insert(key.to_string(), Instant::now() + self.ttl);
                tracing::debug!(user_id = %user.user_id, "Registered user for session");
                true
            }
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "Failed to ensure user upstream");
                false
            }
        }
    }

    pub async fn forget(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Removes expired entries; returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
