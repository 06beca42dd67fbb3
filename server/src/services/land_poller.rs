use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use chrono::Utc;
use landmap_shared::{CapitalColorModes, CountryData, LandData};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::land_refresh_interval;
use crate::state::{AppState, LandSource, LiveSnapshot, PreSerializedEvent, RefreshSummary};
use crate::store::{
    CAPITAL_COLOR_MODES_KEY, COUNTRY_AREAS_KEY, COUNTRY_CAPITALS_KEY, COUNTRY_CAPITALS_SPAWN_KEY,
    COUNTRY_SPAWN_KEY, LAND_AREAS_KEY, LAND_MARKERS_KEY, StoreError,
};

const BODY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream status {status}; body preview: {preview}")]
    Status {
        status: reqwest::StatusCode,
        preview: String,
    },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode marker payload: {source}; body preview: {preview}")]
    Decode {
        #[source]
        source: serde_json::Error,
        preview: String,
    },
}

/// Both the remote source and the local fallback failed.
#[derive(Debug, Error)]
#[error("remote source failed ({remote}); local fallback failed ({local})")]
pub struct FetchError {
    pub remote: SourceError,
    pub local: SourceError,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("refreshed data could not be persisted: {0}")]
    Store(#[from] StoreError),
}

pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(land_refresh_interval());

    loop {
        interval.tick().await;

        match refresh_once(&state).await {
            Ok(summary) => debug!(revision = summary.revision, "scheduled land refresh complete"),
            Err(e) => warn!(error = %e, "scheduled land refresh failed; keeping previous data"),
        }
    }
}

/// Fetch, aggregate, publish and persist one pass. The previous snapshot stays live when
/// the fetch fails.
pub async fn refresh_once(state: &AppState) -> Result<RefreshSummary, RefreshError> {
    let _guard = state.refresh_lock.lock().await;

    let (payload, source) = match fetch_marker_world(
        &state.http_client,
        &state.data_source_url,
        &state.local_data_source_path,
    )
    .await
    {
        Ok(fetched) => fetched,
        Err(e) => {
            state.observability.record_refresh_failure();
            return Err(e.into());
        }
    };
    if source == LandSource::Local {
        state.observability.record_local_fallback();
    }

    let land = LandData::from_marker_world(&payload);
    let summary = apply_land_data(state, land, source).await?;
    state.observability.record_refresh_success();
    Ok(summary)
}

/// Aggregate `land`, swap it in as the live snapshot, announce it, then persist raw and
/// aggregate blobs. A persistence failure is reported after the swap.
pub async fn apply_land_data(
    state: &AppState,
    land: LandData,
    source: LandSource,
) -> Result<RefreshSummary, StoreError> {
    let countries = CountryData::from_land(&land);
    let entries = blob_entries(&land, &countries)?;

    let summary = publish_snapshot(state, land, countries, source).await;

    if let Err(e) = state.store.set_many(&entries).await {
        state.observability.record_store_failure();
        warn!(error = %e, backend = state.store.backend_name(), "failed to persist land data");
        return Err(e);
    }

    Ok(summary)
}

/// Re-aggregate the last persisted raw data so the API serves before the first fetch.
pub async fn restore_from_store(state: &AppState) {
    match state.store.get_json(CAPITAL_COLOR_MODES_KEY).await {
        Ok(Some(value)) => {
            let modes = CapitalColorModes::from_json(&value);
            info!(overrides = modes.len(), "restored capital color modes");
            *state.capital_color_modes.write().await = modes;
        }
        Ok(None) => {}
        Err(e) => {
            state.observability.record_store_failure();
            warn!(error = %e, "failed to load capital color modes");
        }
    }

    let markers = load_blob(state, LAND_MARKERS_KEY).await;
    let areas = load_blob(state, LAND_AREAS_KEY).await;
    if markers.is_none() && areas.is_none() {
        info!("no persisted land data; waiting for first refresh");
        return;
    }

    let land = LandData::from_parts(markers.as_ref(), areas.as_ref());
    let countries = CountryData::from_land(&land);
    let summary = publish_snapshot(state, land, countries, LandSource::Store).await;
    info!(
        revision = summary.revision,
        markers = summary.markers,
        areas = summary.areas,
        "restored land data from store"
    );
}

async fn load_blob(state: &AppState, key: &str) -> Option<Value> {
    match state.store.get_json(key).await {
        Ok(value) => value,
        Err(e) => {
            state.observability.record_store_failure();
            warn!(key, error = %e, "failed to load persisted blob");
            None
        }
    }
}

async fn publish_snapshot(
    state: &AppState,
    land: LandData,
    countries: CountryData,
    source: LandSource,
) -> RefreshSummary {
    let revision = state.next_revision.fetch_add(1, Ordering::Relaxed) + 1;
    let summary = RefreshSummary::new(revision, Utc::now(), source, &land, &countries);
    let snapshot = LiveSnapshot::build(summary.clone(), land, countries);
    let json = snapshot.refresh_json.clone();

    *state.live_snapshot.write().await = snapshot;
    state.country_colors.lock().await.clear();

    let receivers = state
        .event_tx
        .send(PreSerializedEvent::Refresh { revision, json })
        .unwrap_or(0);

    info!(
        revision,
        source = source.as_str(),
        markers = summary.markers,
        areas = summary.areas,
        countries = summary.countries,
        capitals = summary.capitals,
        receivers,
        "land snapshot published"
    );
    summary
}

fn blob_entries(
    land: &LandData,
    countries: &CountryData,
) -> Result<Vec<(&'static str, Value)>, StoreError> {
    Ok(vec![
        (LAND_MARKERS_KEY, to_blob(LAND_MARKERS_KEY, &land.markers)?),
        (LAND_AREAS_KEY, to_blob(LAND_AREAS_KEY, &land.areas)?),
        (COUNTRY_SPAWN_KEY, to_blob(COUNTRY_SPAWN_KEY, &countries.country_spawn)?),
        (COUNTRY_AREAS_KEY, to_blob(COUNTRY_AREAS_KEY, &countries.country_areas)?),
        (
            COUNTRY_CAPITALS_KEY,
            to_blob(COUNTRY_CAPITALS_KEY, &countries.country_capitals)?,
        ),
        (
            COUNTRY_CAPITALS_SPAWN_KEY,
            to_blob(COUNTRY_CAPITALS_SPAWN_KEY, &countries.country_capitals_spawn)?,
        ),
    ])
}

fn to_blob<T: serde::Serialize>(key: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Json {
        key: key.to_string(),
        source,
    })
}

/// Single remote attempt, then the local file.
pub async fn fetch_marker_world(
    client: &reqwest::Client,
    url: &str,
    local_path: &Path,
) -> Result<(Value, LandSource), FetchError> {
    let remote = match fetch_remote(client, url).await {
        Ok(payload) => return Ok((payload, LandSource::Remote)),
        Err(e) => e,
    };
    warn!(url, error = %remote, "remote marker source failed; trying local file");

    match read_local(local_path).await {
        Ok(payload) => Ok((payload, LandSource::Local)),
        Err(local) => Err(FetchError { remote, local }),
    }
}

async fn fetch_remote(client: &reqwest::Client, url: &str) -> Result<Value, SourceError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    let bytes = resp.bytes().await?;

    if !status.is_success() {
        return Err(SourceError::Status {
            status,
            preview: body_preview(&bytes),
        });
    }
    decode_payload(&bytes)
}

async fn read_local(path: &Path) -> Result<Value, SourceError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_payload(&bytes)
}

fn decode_payload(bytes: &[u8]) -> Result<Value, SourceError> {
    serde_json::from_slice(bytes).map_err(|source| SourceError::Decode {
        source,
        preview: body_preview(bytes),
    })
}

fn body_preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(BODY_PREVIEW_CHARS)
        .collect()
}
