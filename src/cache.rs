//! Desired-State Cache — durable mirror of replica-set specs keyed by UID.
//!
//! SQLite-class embedded store: the volume is tiny (tens of replica-sets per
//! node), the access pattern is read-rare/write-rare, and the whole point is
//! surviving a cold reboot without any cluster-side coordination. An
//! in-memory map would be lost exactly when it is most needed.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::events::ReplicaSetRecord;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("serialization error: uid={uid:?} value={preview}")]
    Serialization { uid: Option<String>, preview: String },
}

#[derive(Clone)]
pub struct DesiredStateCache {
    pool: SqlitePool,
}

impl DesiredStateCache {
    /// Open (creating if absent, including parent directories) the SQLite
    /// file at `path` and run the `init()` migration. Idempotent.
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::Serialization {
                        uid: None,
                        preview: format!("failed to create cache directory {parent:?}: {e}"),
                    }
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let cache = DesiredStateCache { pool };
        cache.init().await?;
        Ok(cache)
    }

    /// Ensure the `rs(uid PRIMARY KEY, spec TEXT)` table exists. Safe to call
    /// repeatedly.
    pub async fn init(&self) -> Result<(), CacheError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS rs (uid TEXT PRIMARY KEY, spec TEXT)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert the observed replica-set under its UID. Persists the entire
    /// observed record rather than only its `spec` sub-tree, the more
    /// defensive choice when downstream consumers are unknown.
    pub async fn save(&self, record: &ReplicaSetRecord) -> Result<(), CacheError> {
        let spec_str = serde_json::to_string(record).map_err(|e| CacheError::Serialization {
            uid: Some(record.uid.clone()),
            preview: truncate(&format!("{record:?}: {e}"), 300),
        })?;

        sqlx::query("REPLACE INTO rs(uid, spec) VALUES(?, ?)")
            .bind(&record.uid)
            .bind(spec_str)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every stored record, in unspecified order. Used only at cold boot.
    pub async fn load_all(&self) -> Result<Vec<ReplicaSetRecord>, CacheError> {
        let rows = sqlx::query("SELECT spec FROM rs").fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                let spec_str: String = row.get("spec");
                serde_json::from_str::<ReplicaSetRecord>(&spec_str).map_err(|e| {
                    CacheError::Serialization {
                        uid: None,
                        preview: truncate(&format!("{spec_str}: {e}"), 300),
                    }
                })
            })
            .collect()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}…", &s[..max])
    } else {
        s.to_string()
    }
}
