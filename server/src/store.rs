use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;

pub const LAND_MARKERS_KEY: &str = "landMarkers";
pub const LAND_AREAS_KEY: &str = "landAreas";
pub const COUNTRY_SPAWN_KEY: &str = "countrySpawn";
pub const COUNTRY_AREAS_KEY: &str = "countryAreas";
pub const COUNTRY_CAPITALS_KEY: &str = "countryCapitals";
pub const COUNTRY_CAPITALS_SPAWN_KEY: &str = "countryCapitalsSpawn";
pub const CAPITAL_COLOR_MODES_KEY: &str = "capitalColorModes";

/// Every key the API serves from the live snapshot, in publication order.
pub const SNAPSHOT_BLOB_KEYS: [&str; 6] = [
    LAND_MARKERS_KEY,
    LAND_AREAS_KEY,
    COUNTRY_SPAWN_KEY,
    COUNTRY_AREAS_KEY,
    COUNTRY_CAPITALS_KEY,
    COUNTRY_CAPITALS_SPAWN_KEY,
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode or decode blob `{key}`: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/value persistence for JSON blobs. Writing `null` removes the key.
#[derive(Clone)]
pub enum BlobStore {
    Memory(Arc<DashMap<String, Value>>),
    Postgres(PgPool),
}

impl BlobStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(DashMap::new()))
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }

    pub async fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self {
            Self::Memory(map) => Ok(map.get(key).map(|entry| entry.value().clone())),
            Self::Postgres(pool) => {
                let row: Option<(String,)> =
                    sqlx::query_as("SELECT payload::text FROM stored_blobs WHERE key = $1")
                        .bind(key)
                        .fetch_optional(pool)
                        .await?;
                row.map(|(text,)| {
                    serde_json::from_str(&text).map_err(|source| StoreError::Json {
                        key: key.to_string(),
                        source,
                    })
                })
                .transpose()
            }
        }
    }

    pub async fn set_json(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        if value.is_null() {
            return self.remove(key).await;
        }
        match self {
            Self::Memory(map) => {
                map.insert(key.to_string(), value.clone());
                Ok(())
            }
            Self::Postgres(pool) => {
                let payload = encode(key, value)?;
                sqlx::query(UPSERT_SQL)
                    .bind(key)
                    .bind(payload)
                    .execute(pool)
                    .await?;
                Ok(())
            }
        }
    }

    /// Writes a batch of blobs together. Postgres applies the batch in one transaction.
    pub async fn set_many(&self, entries: &[(&str, Value)]) -> Result<(), StoreError> {
        match self {
            Self::Memory(_) => {
                for (key, value) in entries {
                    self.set_json(key, value).await?;
                }
                Ok(())
            }
            Self::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for (key, value) in entries {
                    if value.is_null() {
                        sqlx::query(DELETE_SQL)
                            .bind(*key)
                            .execute(&mut *tx)
                            .await?;
                    } else {
                        let payload = encode(key, value)?;
                        sqlx::query(UPSERT_SQL)
                            .bind(*key)
                            .bind(payload)
                            .execute(&mut *tx)
                            .await?;
                    }
                }
                tx.commit().await?;
                Ok(())
            }
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(map) => {
                map.remove(key);
                Ok(())
            }
            Self::Postgres(pool) => {
                sqlx::query(DELETE_SQL).bind(key).execute(pool).await?;
                Ok(())
            }
        }
    }
}

const UPSERT_SQL: &str = "INSERT INTO stored_blobs (key, payload, updated_at) \
     VALUES ($1, $2::jsonb, NOW()) \
     ON CONFLICT (key) DO UPDATE SET payload = EXCLUDED.payload, updated_at = NOW()";

const DELETE_SQL: &str = "DELETE FROM stored_blobs WHERE key = $1";

fn encode(key: &str, value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Json {
        key: key.to_string(),
        source,
    })
}
