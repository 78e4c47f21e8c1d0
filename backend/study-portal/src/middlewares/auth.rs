use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{ApiMessage, EnsureUserRequest};
use crate::services::session_cache::SessionRegistrationCache;
use crate::services::AppState;

pub const SESSION_COOKIE: &str = "session_token";
pub const SIGN_IN_MESSAGE: &str = "please sign in";

/// Claims of the identity-provider session token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JwtClaims {
    pub sub: String, // user_id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Session id, when the provider issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

/// What handlers see of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub claims: JwtClaims,
    pub token: String,
}

impl AuthSession {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Invalid token signature")]
    InvalidSignature,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let validation = Validation::default();

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Bearer header first, then the session cookie set by the sign-in page.
fn extract_token(headers: &HeaderMap, jar: &CookieJar) -> Result<String, AuthError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = bearer {
        return Ok(token.to_string());
    }

    jar.get(SESSION_COOKIE)
        .map(|c| c.value().trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiMessage::new(401, SIGN_IN_MESSAGE)),
    )
        .into_response()
}

/// Requires a valid session, makes sure the learner exists upstream, and
/// exposes [`AuthSession`] to handlers.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_token(&headers, &jar) {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!("Rejecting request: {}", e);
            return unauthorized();
        }
    };

    let claims = match state.jwt.validate_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("JWT validation failed: {}", e);
            return unauthorized();
        }
    };

    tracing::debug!("Authenticated user: {}", claims.sub);

    // Registration failures are logged inside and retried on the next request.
    let session_key = SessionRegistrationCache::session_key(&token, claims.sid.as_deref());
    let user = EnsureUserRequest {
        user_id: claims.sub.clone(),
        email: claims.email.clone(),
        name: claims.name.clone(),
    };
    state.sessions.ensure(&session_key, &token, &user).await;

    request.extensions_mut().insert(AuthSession { claims, token });

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum_extra::extract::cookie::Cookie;

    fn claims(exp_offset: i64) -> JwtClaims {
        let now = chrono::Utc::now().timestamp();
        JwtClaims {
            sub: "user123".to_string(),
            email: Some("learner@example.com".to_string()),
            name: None,
            sid: Some("s-1".to_string()),
            exp: (now + exp_offset) as usize,
            iat: now as usize,
        }
    }

    #[test]
    fn test_jwt_generation_and_validation() {
        let service = JwtService::new("test-secret");

        let token = service.generate_token(&claims(3600)).unwrap();
        let validated = service.validate_token(&token).unwrap();

        assert_eq!(validated.sub, "user123");
        assert_eq!(validated.sid.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_expired_and_foreign_tokens() {
        let service = JwtService::new("test-secret");
        let expired = service.generate_token(&claims(-3600)).unwrap();
        assert_eq!(service.validate_token(&expired), Err(AuthError::ExpiredToken));

        let foreign = JwtService::new("other-secret")
            .generate_token(&claims(3600))
            .unwrap();
        assert_eq!(service.validate_token(&foreign), Err(AuthError::InvalidSignature));

        assert_eq!(service.validate_token("garbage"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_token_from_header_or_cookie() {
        let mut headers = HeaderMap::new();
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "from-cookie"));

        assert_eq!(extract_token(&headers, &jar).unwrap(), "from-cookie");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_token(&headers, &jar).unwrap(), "from-header");

        assert_eq!(
            extract_token(&HeaderMap::new(), &CookieJar::new()),
            Err(AuthError::MissingToken)
        );
    }
}
