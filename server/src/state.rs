use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use landmap_shared::{CapitalColorModes, CoordinateProjector, CountryColorTable, CountryData, LandData};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::warn;

use crate::config::{
    data_source_url, local_data_source_path, sse_broadcast_buffer, upstream_connect_timeout,
    upstream_http_timeout,
};
use crate::store::{
    BlobStore, COUNTRY_AREAS_KEY, COUNTRY_CAPITALS_KEY, COUNTRY_CAPITALS_SPAWN_KEY,
    COUNTRY_SPAWN_KEY, LAND_AREAS_KEY, LAND_MARKERS_KEY,
};

/// Where the data behind a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LandSource {
    Remote,
    Local,
    Store,
}

impl LandSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Store => "store",
        }
    }
}

/// Payload of the `refresh` SSE event and the `POST /api/refresh` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub revision: u64,
    pub refreshed_at: String,
    pub source: LandSource,
    pub markers: usize,
    pub areas: usize,
    pub countries: usize,
    pub capitals: usize,
    pub capital_spawns: usize,
}

/// Pre-serialized SSE event, shared by all subscribers.
#[derive(Debug, Clone)]
pub enum PreSerializedEvent {
    Refresh { revision: u64, json: Arc<Bytes> },
    CapitalColorModes { revision: u64, json: Arc<Bytes> },
}

impl RefreshSummary {
    pub fn new(
        revision: u64,
        refreshed_at: DateTime<Utc>,
        source: LandSource,
        land: &LandData,
        countries: &CountryData,
    ) -> Self {
        Self {
            revision,
            refreshed_at: refreshed_at.to_rfc3339(),
            source,
            markers: land.markers.len(),
            areas: land.areas.len(),
            countries: countries.country_names().len(),
            capitals: countries.country_capitals.len(),
            capital_spawns: countries.country_capitals_spawn.len(),
        }
    }
}

/// One fully aggregated view of the land data. Replaced wholesale on every refresh.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub revision: u64,
    /// `None` until the first refresh or restore.
    pub summary: Option<RefreshSummary>,
    pub land: Arc<LandData>,
    pub countries: Arc<CountryData>,
    pub blobs: IndexMap<&'static str, Arc<Bytes>>,
    pub refresh_json: Arc<Bytes>,
}

impl LiveSnapshot {
    pub fn build(summary: RefreshSummary, land: LandData, countries: CountryData) -> Self {
        let mut blobs = IndexMap::new();
        blobs.insert(LAND_MARKERS_KEY, serialize_blob(LAND_MARKERS_KEY, &land.markers));
        blobs.insert(LAND_AREAS_KEY, serialize_blob(LAND_AREAS_KEY, &land.areas));
        blobs.insert(
            COUNTRY_SPAWN_KEY,
            serialize_blob(COUNTRY_SPAWN_KEY, &countries.country_spawn),
        );
        blobs.insert(
            COUNTRY_AREAS_KEY,
            serialize_blob(COUNTRY_AREAS_KEY, &countries.country_areas),
        );
        blobs.insert(
            COUNTRY_CAPITALS_KEY,
            serialize_blob(COUNTRY_CAPITALS_KEY, &countries.country_capitals),
        );
        blobs.insert(
            COUNTRY_CAPITALS_SPAWN_KEY,
            serialize_blob(COUNTRY_CAPITALS_SPAWN_KEY, &countries.country_capitals_spawn),
        );
        let refresh_json = serialize_blob("refresh", &summary);

        Self {
            revision: summary.revision,
            summary: Some(summary),
            land: Arc::new(land),
            countries: Arc::new(countries),
            blobs,
            refresh_json,
        }
    }

    pub fn blob(&self, key: &str) -> Option<Arc<Bytes>> {
        self.blobs.get(key).cloned()
    }
}

fn serialize_blob<T: Serialize>(key: &str, value: &T) -> Arc<Bytes> {
    match serde_json::to_vec(value) {
        Ok(json) => Arc::new(Bytes::from(json)),
        Err(e) => {
            warn!(key, error = %e, "failed to serialize payload; serving empty object");
            Arc::new(Bytes::from_static(b"{}"))
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub live_snapshot: Arc<RwLock<LiveSnapshot>>,
    pub next_revision: Arc<AtomicU64>,
    pub event_tx: broadcast::Sender<PreSerializedEvent>,
    /// Country name -> colour, cleared on every aggregation pass.
    pub country_colors: Arc<Mutex<CountryColorTable>>,
    pub capital_color_modes: Arc<RwLock<CapitalColorModes>>,
    /// Serializes refreshes so an on-demand refresh cannot interleave with the poller.
    pub refresh_lock: Arc<Mutex<()>>,
    pub projector: CoordinateProjector,
    pub http_client: reqwest::Client,
    pub data_source_url: String,
    pub local_data_source_path: PathBuf,
    pub store: BlobStore,
    pub observability: Arc<ObservabilityCounters>,
}

impl AppState {
    pub fn new(store: BlobStore) -> Self {
        let (event_tx, _) = broadcast::channel(sse_broadcast_buffer());
        let request_timeout = upstream_http_timeout();
        let connect_timeout = upstream_connect_timeout();
        let http_client = reqwest::Client::builder()
            .user_agent("landmap/0.1")
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .or_else(|e| {
                warn!(
                    error = %e,
                    "failed to build configured HTTP client, retrying without custom user-agent"
                );
                reqwest::Client::builder()
                    .timeout(request_timeout)
                    .connect_timeout(connect_timeout)
                    .build()
            })
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client without timeouts");
                reqwest::Client::new()
            });

        Self {
            live_snapshot: Arc::new(RwLock::new(LiveSnapshot::default())),
            next_revision: Arc::new(AtomicU64::new(0)),
            event_tx,
            country_colors: Arc::new(Mutex::new(CountryColorTable::default())),
            capital_color_modes: Arc::new(RwLock::new(CapitalColorModes::default())),
            refresh_lock: Arc::new(Mutex::new(())),
            projector: CoordinateProjector::default(),
            http_client,
            data_source_url: data_source_url(),
            local_data_source_path: local_data_source_path(),
            store,
            observability: Arc::new(ObservabilityCounters::default()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    refresh_success_total: AtomicU64,
    refresh_failure_total: AtomicU64,
    local_fallback_total: AtomicU64,
    store_failures_total: AtomicU64,
    blob_requests_total: AtomicU64,
    blob_not_modified_total: AtomicU64,
    dataset_requests_total: AtomicU64,
    export_requests_total: AtomicU64,
    export_empty_total: AtomicU64,
    export_failures_total: AtomicU64,
    dropped_sse_events_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub refresh_success_total: u64,
    pub refresh_failure_total: u64,
    pub local_fallback_total: u64,
    pub store_failures_total: u64,
    pub blob_requests_total: u64,
    pub blob_not_modified_total: u64,
    pub dataset_requests_total: u64,
    pub export_requests_total: u64,
    pub export_empty_total: u64,
    pub export_failures_total: u64,
    pub dropped_sse_events_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            refresh_success_total: self.refresh_success_total.load(Ordering::Relaxed),
            refresh_failure_total: self.refresh_failure_total.load(Ordering::Relaxed),
            local_fallback_total: self.local_fallback_total.load(Ordering::Relaxed),
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
            blob_requests_total: self.blob_requests_total.load(Ordering::Relaxed),
            blob_not_modified_total: self.blob_not_modified_total.load(Ordering::Relaxed),
            dataset_requests_total: self.dataset_requests_total.load(Ordering::Relaxed),
            export_requests_total: self.export_requests_total.load(Ordering::Relaxed),
            export_empty_total: self.export_empty_total.load(Ordering::Relaxed),
            export_failures_total: self.export_failures_total.load(Ordering::Relaxed),
            dropped_sse_events_total: self.dropped_sse_events_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_refresh_success(&self) {
        self.refresh_success_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failure_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_fallback(&self) {
        self.local_fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blob_request(&self) {
        self.blob_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blob_not_modified(&self) {
        self.blob_not_modified_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dataset_request(&self) {
        self.dataset_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_request(&self) {
        self.export_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_empty(&self) {
        self.export_empty_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_failure(&self) {
        self.export_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_sse_events(&self, count: u64) {
        self.dropped_sse_events_total
            .fetch_add(count, Ordering::Relaxed);
    }
}
