use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::api::health))
        .route("/api/metrics", get(routes::api::metrics))
        .route("/api/blobs/{key}", get(routes::api::get_blob))
        .route("/api/datasets/{key}", get(routes::api::get_dataset))
        .route("/api/project", get(routes::api::project))
        .route(
            "/api/capitals/color-modes",
            get(routes::api::get_capital_color_modes),
        )
        .route(
            "/api/capitals/{country}/color-mode/toggle",
            post(routes::api::toggle_capital_color_mode),
        )
        .route("/api/refresh", post(routes::api::refresh))
        .route("/api/events", get(routes::sse::land_events))
        .route("/api/export", get(routes::export::export_image))
        .layer(CompressionLayer::new())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::build_app;
    use crate::state::AppState;
    use crate::store::BlobStore;

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let app = build_app(AppState::new(BlobStore::memory()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/territories")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refresh_requires_post() {
        let app = build_app(AppState::new(BlobStore::memory()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/refresh")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
