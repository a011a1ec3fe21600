//! Router configuration.

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_file, delete_file, download_file, file_info, list_files, update_file, AppState,
};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// Create the file API router.
///
/// The request body limit is derived from the service's upload limit.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let body_limit =
        usize::try_from(app_state.files.max_upload_size()).unwrap_or(usize::MAX);
    let body_limit = body_limit.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/files", get(list_files).post(create_file))
        .route("/files/down", get(download_file))
        .route("/files/info", get(file_info))
        .route("/files/upd", put(update_file))
        .route("/files/del", delete(delete_file))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_router() {
        let response = create_health_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }
}
