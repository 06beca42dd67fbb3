use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use landmap_shared::{OverlayKey, SortDirection, SortField, dataset_items, filter_and_sort};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::services::land_poller::{self, RefreshError};
use crate::state::{AppState, ObservabilitySnapshot, PreSerializedEvent};
use crate::store::{CAPITAL_COLOR_MODES_KEY, SNAPSHOT_BLOB_KEYS};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const BLOB_CACHE_CONTROL: &str = "public, max-age=30";
const MAX_COUNTRY_NAME_LEN: usize = 64;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (revision, markers, areas, countries) = {
        let snapshot = state.live_snapshot.read().await;
        (
            snapshot.revision,
            snapshot.land.markers.len(),
            snapshot.land.areas.len(),
            snapshot.countries.country_names().len(),
        )
    };
    let observability = state.observability.snapshot();
    Json(json!({
        "status": "ok",
        "revision": revision,
        "markers": markers,
        "areas": areas,
        "countries": countries,
        "store": state.store.backend_name(),
        "observability": {
            "refresh_success_total": observability.refresh_success_total,
            "refresh_failure_total": observability.refresh_failure_total,
            "local_fallback_total": observability.local_fallback_total,
            "store_failures_total": observability.store_failures_total,
            "export_requests_total": observability.export_requests_total,
            "export_failures_total": observability.export_failures_total,
        }
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let (revision, markers, areas) = {
        let snapshot = state.live_snapshot.read().await;
        (
            snapshot.revision,
            snapshot.land.markers.len(),
            snapshot.land.areas.len(),
        )
    };
    let body = render_prometheus_metrics(revision, markers, areas, state.observability.snapshot());

    (
        [
            (header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}

fn render_prometheus_metrics(
    revision: u64,
    markers: usize,
    areas: usize,
    observability: ObservabilitySnapshot,
) -> String {
    let mut body = String::new();
    let gauges = [
        (
            "landmap_snapshot_revision",
            "Revision of the live land snapshot.",
            revision,
        ),
        (
            "landmap_markers",
            "Number of land markers in the live snapshot.",
            markers as u64,
        ),
        (
            "landmap_areas",
            "Number of land areas in the live snapshot.",
            areas as u64,
        ),
    ];
    for (name, help, value) in gauges {
        let _ = writeln!(body, "# HELP {name} {help}");
        let _ = writeln!(body, "# TYPE {name} gauge");
        let _ = writeln!(body, "{name} {value}");
    }

    let counters = [
        (
            "landmap_refresh_success_total",
            "Land refreshes that published a new snapshot.",
            observability.refresh_success_total,
        ),
        (
            "landmap_refresh_failure_total",
            "Land refreshes where both data sources failed.",
            observability.refresh_failure_total,
        ),
        (
            "landmap_local_fallback_total",
            "Refreshes served from the local data file.",
            observability.local_fallback_total,
        ),
        (
            "landmap_store_failures_total",
            "Blob store reads or writes that failed.",
            observability.store_failures_total,
        ),
        (
            "landmap_blob_requests_total",
            "Blob API requests.",
            observability.blob_requests_total,
        ),
        (
            "landmap_blob_not_modified_total",
            "Blob API requests answered with 304.",
            observability.blob_not_modified_total,
        ),
        (
            "landmap_dataset_requests_total",
            "Dataset listing requests.",
            observability.dataset_requests_total,
        ),
        (
            "landmap_export_requests_total",
            "Image export requests.",
            observability.export_requests_total,
        ),
        (
            "landmap_export_empty_total",
            "Image exports with nothing to export.",
            observability.export_empty_total,
        ),
        (
            "landmap_export_failures_total",
            "Image exports where rendering failed.",
            observability.export_failures_total,
        ),
        (
            "landmap_dropped_sse_events_total",
            "SSE events skipped by lagging clients.",
            observability.dropped_sse_events_total,
        ),
    ];
    for (name, help, value) in counters {
        let _ = writeln!(body, "# HELP {name} {help}");
        let _ = writeln!(body, "# TYPE {name} counter");
        let _ = writeln!(body, "{name} {value}");
    }

    body
}

/// Serve a pre-serialized blob. Known keys without data yet answer `null`.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.observability.record_blob_request();

    let body: Bytes = if key == CAPITAL_COLOR_MODES_KEY {
        let modes = state.capital_color_modes.read().await;
        match serde_json::to_vec(&*modes) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize capital color modes");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed");
            }
        }
    } else if SNAPSHOT_BLOB_KEYS.contains(&key.as_str()) {
        let blob = state.live_snapshot.read().await.blob(&key);
        match blob {
            Some(json) => (*json).clone(),
            None => Bytes::from_static(b"null"),
        }
    } else {
        return error_response(StatusCode::NOT_FOUND, &format!("unknown blob key `{key}`"));
    };

    let etag = blob_etag(&key, &body);
    if if_none_match_matches(&headers, &etag) {
        state.observability.record_blob_not_modified();
        return not_modified_response(BLOB_CACHE_CONTROL, Some(etag.as_str()));
    }

    json_bytes_response(body, BLOB_CACHE_CONTROL, Some(etag.as_str()))
}

#[derive(Debug, Default, Deserialize)]
pub struct DatasetQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    sort: Option<SortField>,
    #[serde(default)]
    dir: Option<SortDirection>,
}

pub async fn get_dataset(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<DatasetQuery>,
) -> Response {
    state.observability.record_dataset_request();
    let Ok(key) = key.parse::<OverlayKey>() else {
        return error_response(StatusCode::NOT_FOUND, &format!("unknown dataset `{key}`"));
    };

    let (revision, items) = {
        let snapshot = state.live_snapshot.read().await;
        (
            snapshot.revision,
            dataset_items(key, &snapshot.land, &snapshot.countries),
        )
    };
    let total = items.len();
    let items = filter_and_sort(
        items,
        query.q.as_deref().unwrap_or_default(),
        query.sort.unwrap_or_default(),
        query.dir.unwrap_or_default(),
    );

    Json(json!({
        "key": key,
        "revision": revision,
        "total": total,
        "count": items.len(),
        "items": items,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    x: f64,
    z: f64,
}

pub async fn project(State(state): State<AppState>, Query(query): Query<ProjectQuery>) -> Response {
    let Some(point) = state.projector.forward(query.x, query.z) else {
        return error_response(StatusCode::BAD_REQUEST, "coordinates must be finite numbers");
    };
    let image = state.projector.full_image_bounds();
    let inside = point.x >= image.min.x
        && point.x <= image.max.x
        && point.y >= image.min.y
        && point.y <= image.max.y;

    Json(json!({
        "x": query.x,
        "z": query.z,
        "pixelX": point.x,
        "pixelY": point.y,
        "insideImage": inside,
    }))
    .into_response()
}

pub async fn get_capital_color_modes(State(state): State<AppState>) -> Response {
    let modes = state.capital_color_modes.read().await.clone();
    Json(modes).into_response()
}

/// Flip one country's capital colour. The new table is persisted before it goes live.
pub async fn toggle_capital_color_mode(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> Response {
    let country = match normalize_country_name(&country) {
        Ok(country) => country.to_string(),
        Err(status) => return error_response(status, "invalid country name"),
    };

    let mut modes = state.capital_color_modes.write().await;
    let mut next = modes.clone();
    let mode = next.toggle(&country);

    let value = match serde_json::to_value(&next) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "failed to encode capital color modes");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed");
        }
    };
    if let Err(e) = state.store.set_json(CAPITAL_COLOR_MODES_KEY, &value).await {
        state.observability.record_store_failure();
        warn!(error = %e, %country, "failed to persist capital color modes");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist color mode");
    }
    *modes = next;
    drop(modes);

    let revision = state.live_snapshot.read().await.revision;
    if let Ok(json) = serde_json::to_vec(&value) {
        let _ = state.event_tx.send(PreSerializedEvent::CapitalColorModes {
            revision,
            json: Arc::new(Bytes::from(json)),
        });
    }

    Json(json!({ "country": country, "mode": mode })).into_response()
}

pub async fn refresh(State(state): State<AppState>) -> Response {
    match land_poller::refresh_once(&state).await {
        Ok(summary) => Json(summary).into_response(),
        Err(RefreshError::Fetch(e)) => {
            warn!(error = %e, "on-demand refresh failed");
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
        Err(RefreshError::Store(e)) => {
            warn!(error = %e, "on-demand refresh published but was not persisted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn normalize_country_name(name: &str) -> Result<&str, StatusCode> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_COUNTRY_NAME_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(trimmed)
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn blob_etag(key: &str, body: &[u8]) -> String {
    format!("\"{key}-{:08x}\"", crc32fast::hash(body))
}

fn json_bytes_response(body: Bytes, cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn not_modified_response(cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn normalize_etag(candidate: &str) -> &str {
    candidate.strip_prefix("W/").unwrap_or(candidate).trim()
}

fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH) else {
        return false;
    };
    let Ok(raw) = value.to_str() else {
        return false;
    };

    raw.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || normalize_etag(candidate) == normalize_etag(etag)
    })
}
