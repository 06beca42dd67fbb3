use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATA_SOURCE_URL: &str = "https://map.simmc.cc/tiles/_markers_/marker_world.json";
pub const DEFAULT_LOCAL_DATA_SOURCE_PATH: &str = "data/marker_world.json";

pub const DEFAULT_LAND_REFRESH_SECS: u64 = 600; // 10 minutes
pub const SSE_KEEPALIVE_SECS: u64 = 15;
pub const DEFAULT_BROADCAST_BUFFER: usize = 64;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_SERVER_PORT: u16 = 3000;

// Export
pub const DEFAULT_MAX_EXPORT_DIMENSION: u32 = landmap_shared::export::MAX_EXPORT_DIMENSION;
pub const DEFAULT_MAP_MIN_ZOOM: i32 = landmap_shared::export::DEFAULT_MIN_ZOOM;
pub const DEFAULT_EXPORT_PADDING_PX: f64 = landmap_shared::export::DEFAULT_EXPORT_PADDING_PX;

fn env_positive<T>(name: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn data_source_url() -> String {
    env_non_empty("DATA_SOURCE_URL").unwrap_or_else(|| DEFAULT_DATA_SOURCE_URL.to_string())
}

pub fn local_data_source_path() -> PathBuf {
    env_non_empty("LOCAL_DATA_SOURCE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DATA_SOURCE_PATH))
}

pub fn land_refresh_interval() -> Duration {
    Duration::from_secs(env_positive("LAND_REFRESH_SECS").unwrap_or(DEFAULT_LAND_REFRESH_SECS))
}

pub fn db_max_connections() -> u32 {
    env_positive("DB_MAX_CONNECTIONS").unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
}

pub fn database_url() -> Option<String> {
    env_non_empty("DATABASE_URL")
}

pub fn sse_broadcast_buffer() -> usize {
    env_positive("SSE_BROADCAST_BUFFER").unwrap_or(DEFAULT_BROADCAST_BUFFER)
}

pub fn upstream_http_timeout() -> Duration {
    Duration::from_secs(
        env_positive("UPSTREAM_HTTP_TIMEOUT_SECS").unwrap_or(DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS),
    )
}

pub fn upstream_connect_timeout() -> Duration {
    Duration::from_secs(
        env_positive("UPSTREAM_CONNECT_TIMEOUT_SECS")
            .unwrap_or(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS),
    )
}

pub fn server_port() -> u16 {
    env_positive("SERVER_PORT").unwrap_or(DEFAULT_SERVER_PORT)
}

/// Upper bound on the longest side of an exported image, never above the core limit.
pub fn max_export_dimension() -> u32 {
    env_positive::<u32>("MAX_EXPORT_DIMENSION")
        .map(|value| value.min(DEFAULT_MAX_EXPORT_DIMENSION))
        .unwrap_or(DEFAULT_MAX_EXPORT_DIMENSION)
}

/// Coarsest zoom level exports may fall back to. Positive values are ignored.
pub fn map_min_zoom() -> i32 {
    std::env::var("MAP_MIN_ZOOM")
        .ok()
        .and_then(|value| value.trim().parse::<i32>().ok())
        .filter(|value| *value <= 0)
        .unwrap_or(DEFAULT_MAP_MIN_ZOOM)
}

pub fn export_padding_px() -> f64 {
    std::env::var("EXPORT_PADDING_PX")
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(DEFAULT_EXPORT_PADDING_PX)
}
