use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use landmap_shared::colors::parse_css_color;
use landmap_shared::overlay::OverlayKey;
use landmap_shared::{
    ExportAnchor, ExportError, ExportOptions, ExportedImage, PixelPoint, build_overlays,
    export_overlay_image,
};
use serde::Deserialize;
use tracing::warn;

use crate::config::{export_padding_px, map_min_zoom, max_export_dimension};
use crate::render::SkiaRenderer;
use crate::routes::api::error_response;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    layers: Option<String>,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    z: Option<f64>,
    #[serde(default)]
    px: Option<f64>,
    #[serde(default)]
    py: Option<f64>,
    #[serde(default)]
    max_width: Option<f64>,
    #[serde(default)]
    max_height: Option<f64>,
    #[serde(default)]
    padding: Option<f64>,
    #[serde(default)]
    max_dimension: Option<u32>,
    #[serde(default)]
    background: Option<String>,
}

fn export_options(query: ExportQuery) -> Result<ExportOptions, String> {
    let layers = match query.layers.as_deref() {
        Some(raw) => OverlayKey::parse_list(raw).map_err(|e| e.to_string())?,
        None => Vec::new(),
    };

    let top_left = match (query.x, query.z, query.px, query.py) {
        (Some(x), Some(z), None, None) => Some(ExportAnchor::World { x, z }),
        (None, None, Some(px), Some(py)) => Some(ExportAnchor::Pixel(PixelPoint::new(px, py))),
        (None, None, None, None) => None,
        _ => return Err("anchor needs exactly one of x+z or px+py".to_string()),
    };
    if [query.x, query.z, query.px, query.py]
        .into_iter()
        .flatten()
        .any(|value| !value.is_finite())
    {
        return Err("anchor coordinates must be finite numbers".to_string());
    }

    let background = match query.background.as_deref() {
        Some(raw) => Some(
            parse_css_color(raw).ok_or_else(|| format!("unrecognised background colour `{raw}`"))?,
        ),
        None => None,
    };

    let limit = max_export_dimension();
    Ok(ExportOptions {
        top_left,
        max_width: query.max_width,
        max_height: query.max_height,
        padding_px: Some(
            query
                .padding
                .filter(|padding| padding.is_finite() && *padding >= 0.0)
                .unwrap_or_else(export_padding_px),
        ),
        max_dimension: Some(query.max_dimension.unwrap_or(limit).min(limit)),
        min_zoom: map_min_zoom(),
        background,
        layers,
    })
}

/// Render the requested overlays to a PNG attachment.
pub async fn export_image(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Response {
    state.observability.record_export_request();
    let options = match export_options(query) {
        Ok(options) => options,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let (land, countries) = {
        let snapshot = state.live_snapshot.read().await;
        (snapshot.land.clone(), snapshot.countries.clone())
    };
    let modes = state.capital_color_modes.read().await.clone();
    let mut overlays = {
        let mut colors = state.country_colors.lock().await;
        build_overlays(&land, &countries, &state.projector, &mut colors, &modes)
    };
    if !options.layers.is_empty() {
        overlays.show_only(&options.layers);
    }

    let projector = state.projector;
    let date = Utc::now().date_naive();
    let result = tokio::task::spawn_blocking(move || {
        export_overlay_image(&overlays, &options, &projector, &SkiaRenderer, date)
    })
    .await;

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            state.observability.record_export_failure();
            warn!(error = %e, "export task panicked or was cancelled");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "export failed");
        }
    };
    match &result {
        Ok(Some(_)) => {}
        Ok(None) => state.observability.record_export_empty(),
        Err(_) => state.observability.record_export_failure(),
    }
    export_result_response(result)
}

fn export_result_response(result: Result<Option<ExportedImage>, ExportError>) -> Response {
    match result {
        Ok(Some(image)) => png_response(image),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "nothing to export"),
        Err(e) => {
            warn!(error = %e, "overlay export failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn png_response(image: ExportedImage) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", image.filename);
    let zoom = image.plan.zoom.to_string();
    let mode = image.mode.as_str();

    let mut response = Response::new(Body::from(image.bytes));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&zoom) {
        headers.insert("x-export-zoom", value);
    }
    headers.insert("x-export-mode", HeaderValue::from_static(mode));
    response.into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header};
    use serde_json::Value;

    use super::{ExportQuery, export_options, export_result_response};
    use crate::routes::test_support::{seeded_state, spawn_test_server};
    use crate::state::AppState;
    use crate::store::BlobStore;
    use landmap_shared::overlay::OverlayKey;
    use landmap_shared::{ExportAnchor, ExportError};

    #[test]
    fn options_parse_layers_anchor_and_background() {
        let options = export_options(ExportQuery {
            layers: Some("countryCapitals, countryAreas".to_string()),
            x: Some(10.0),
            z: Some(-20.0),
            background: Some("#ffffff".to_string()),
            max_dimension: Some(1_000_000),
            ..ExportQuery::default()
        })
        .expect("valid options");

        assert_eq!(
            options.layers,
            vec![OverlayKey::CountryCapitals, OverlayKey::CountryAreas]
        );
        assert_eq!(options.top_left, Some(ExportAnchor::World { x: 10.0, z: -20.0 }));
        assert_eq!(options.background, Some((255, 255, 255)));
        assert!(options.max_dimension.is_some_and(|limit| limit <= 8192));
    }

    #[test]
    fn options_reject_half_anchors_unknown_layers_and_bad_colours() {
        assert!(
            export_options(ExportQuery {
                x: Some(1.0),
                ..ExportQuery::default()
            })
            .is_err()
        );
        assert!(
            export_options(ExportQuery {
                x: Some(1.0),
                z: Some(1.0),
                px: Some(1.0),
                py: Some(1.0),
                ..ExportQuery::default()
            })
            .is_err()
        );
        assert!(
            export_options(ExportQuery {
                layers: Some("towns".to_string()),
                ..ExportQuery::default()
            })
            .is_err()
        );
        assert!(
            export_options(ExportQuery {
                background: Some("not-a-colour".to_string()),
                ..ExportQuery::default()
            })
            .is_err()
        );
    }

    #[test]
    fn options_reject_non_finite_anchors() {
        assert!(
            export_options(ExportQuery {
                px: Some(f64::NAN),
                py: Some(10.0),
                ..ExportQuery::default()
            })
            .is_err()
        );
        assert!(
            export_options(ExportQuery {
                x: Some(f64::INFINITY),
                z: Some(0.0),
                ..ExportQuery::default()
            })
            .is_err()
        );
    }

    #[test]
    fn renderer_failures_map_to_server_error() {
        let response = export_result_response(Err(ExportError::EmptyImage));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = export_result_response(Ok(None));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn full_export_returns_png_attachment() {
        let state = seeded_state().await;
        let (addr, server_handle) = spawn_test_server(state.clone()).await;

        let response = reqwest::get(format!(
            "http://{addr}/api/export?layers=countryAreas,countryCapitals&background=%23ffffff"
        ))
        .await
        .expect("export request")
        .error_for_status()
        .expect("export status");

        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("image/png")
        );
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .expect("content disposition");
        assert!(disposition.starts_with("attachment; filename=\"overlay-export-full-"));
        assert!(disposition.ends_with(".png\""));
        assert_eq!(
            response
                .headers()
                .get("x-export-zoom")
                .and_then(|value| value.to_str().ok()),
            Some("0")
        );

        let bytes = response.bytes().await.expect("png body");
        let pixmap = tiny_skia::Pixmap::decode_png(&bytes).expect("decode png");
        assert!(pixmap.width() > 0 && pixmap.width() <= 8192);
        assert!(pixmap.height() > 0 && pixmap.height() <= 8192);

        let counters = state.observability.snapshot();
        assert_eq!(counters.export_requests_total, 1);
        assert_eq!(counters.export_failures_total, 0);
        server_handle.abort();
    }

    #[tokio::test]
    async fn clip_export_uses_clip_filename() {
        let state = seeded_state().await;
        let (addr, server_handle) = spawn_test_server(state).await;

        let response = reqwest::get(format!(
            "http://{addr}/api/export?px=100&py=100&max_width=64&max_height=32"
        ))
        .await
        .expect("export request")
        .error_for_status()
        .expect("export status");
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .expect("content disposition");
        assert!(disposition.contains("overlay-export-clip-"));

        let bytes = response.bytes().await.expect("png body");
        let pixmap = tiny_skia::Pixmap::decode_png(&bytes).expect("decode png");
        assert_eq!((pixmap.width(), pixmap.height()), (64, 32));
        server_handle.abort();
    }

    #[tokio::test]
    async fn nothing_to_export_is_not_found_json() {
        let state = AppState::new(BlobStore::memory());
        let (addr, server_handle) = spawn_test_server(state.clone()).await;

        let response = reqwest::get(format!("http://{addr}/api/export"))
            .await
            .expect("export request");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = response.json().await.expect("error json");
        assert_eq!(body["error"], "nothing to export");
        assert_eq!(state.observability.snapshot().export_empty_total, 1);

        let bad = reqwest::get(format!("http://{addr}/api/export?layers=bogus"))
            .await
            .expect("bad layers request");
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let nan_anchor = reqwest::get(format!("http://{addr}/api/export?px=NaN&py=10"))
            .await
            .expect("nan anchor request");
        assert_eq!(nan_anchor.status(), StatusCode::BAD_REQUEST);
        server_handle.abort();
    }
}
