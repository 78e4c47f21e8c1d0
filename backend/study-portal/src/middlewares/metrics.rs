use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records HTTP request count and latency per route template.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| normalize_path(req.uri().path()));

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Fallback when no route matched. Test and question ids are free-form, so
/// everything after the resource segment collapses into one placeholder.
fn normalize_path(path: &str) -> String {
    let mut segments = path.split('/');
    let mut normalized = Vec::new();

    // "", "api", "v1", "<resource>"
    for segment in segments.by_ref().take(4) {
        normalized.push(if is_id_like(segment) { "{id}" } else { segment });
    }
    if segments.next().is_some() {
        normalized.push("{id}");
    }

    normalized.join("/")
}

fn is_id_like(s: &str) -> bool {
    let uuid = s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    let numeric = !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    uuid || numeric
}
