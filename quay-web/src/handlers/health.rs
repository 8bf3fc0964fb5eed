//! Liveness endpoint used by load balancers and local-cluster scripts.

use axum::http::StatusCode;

/// `GET /health` — returns 200 OK iff the process is accepting connections.
///
/// Domain-specific readiness (e.g. "is this broker's registry link up")
/// belongs to the binary that mounts this route, not to this generic
/// web layer.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_ok() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
