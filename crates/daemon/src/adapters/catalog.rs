//! Relational catalog: persists `Video` and `Hash` rows keyed by business
//! identifier, backed by `sqlx` against an embedded SQLite database. Mirrors
//! the original's xorm-over-SQLite path and is the one real relational-DB
//! crate present anywhere in the retrieved pack.

use crate::error::CatalogError;
use crate::video::{Hash, Video};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn insert_or_update(&self, video: &Video) -> Result<u64, CatalogError>;
    /// Records one content-addressed artifact alongside its owning video.
    async fn insert_hash(&self, hash: &Hash) -> Result<u64, CatalogError>;
    async fn is_exist(&self, business_key: &str) -> Result<bool, CatalogError>;
    /// Idempotent schema sync for the registered entities (`video`, `hash`).
    async fn sync(&self) -> Result<(), CatalogError>;
}

/// SQLite-backed catalog. Business key conflicts resolve via an optimistic
/// `version` column: an update only succeeds if the caller's read of
/// `version` still matches, otherwise the row is re-read and the write
/// retried once against the fresh version.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(dsn: &str) -> Result<Self, CatalogError> {
        let pool = SqlitePool::connect(dsn)
            .await
            .map_err(|e| CatalogError::Sql(e.to_string()))?;
        let catalog = Self::new(pool);
        catalog.sync().await?;
        Ok(catalog)
    }

    async fn current_version(&self, business_key: &str) -> Result<Option<i64>, CatalogError> {
        let row = sqlx::query("SELECT version FROM video WHERE business_key = ?")
            .bind(business_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CatalogError::Sql(e.to_string()))?;
        Ok(row.map(|r| r.get::<i64, _>("version")))
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn insert_or_update(&self, video: &Video) -> Result<u64, CatalogError> {
        let existing_version = self.current_version(&video.business_key).await?;

        match existing_version {
            None => {
                let id = if video.id.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    video.id.clone()
                };
                let result = sqlx::query(
                    "INSERT INTO video (id, business_key, intro, alias, role, director, tags, \
                     series, date, length, producer, publisher, language, caption, format, \
                     sharpness, systematics, season, episode, total_episode, kind, uncensored, \
                     source_hash, m3u8_hash, poster_hash, thumb_hash, created_at, updated_at, \
                     version) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                     ?, ?, ?, ?, ?, 1)",
                )
                .bind(&id)
                .bind(&video.business_key)
                .bind(&video.intro)
                .bind(serde_json::to_string(&video.alias).unwrap_or_default())
                .bind(serde_json::to_string(&video.role).unwrap_or_default())
                .bind(&video.director)
                .bind(serde_json::to_string(&video.tags).unwrap_or_default())
                .bind(&video.series)
                .bind(&video.date)
                .bind(&video.length)
                .bind(&video.producer)
                .bind(&video.publisher)
                .bind(&video.language)
                .bind(&video.caption)
                .bind(video.format.to_string())
                .bind(&video.sharpness)
                .bind(&video.systematics)
                .bind(&video.season)
                .bind(&video.episode)
                .bind(&video.total_episode)
                .bind(&video.kind)
                .bind(video.uncensored)
                .bind(&video.source_hash)
                .bind(&video.m3u8_hash)
                .bind(&video.poster_hash)
                .bind(&video.thumb_hash)
                .bind(video.created_at)
                .bind(video.updated_at)
                .execute(&self.pool)
                .await
                .map_err(|e| CatalogError::Sql(e.to_string()))?;
                Ok(result.rows_affected())
            }
            Some(version) => {
                let result = sqlx::query(
                    "UPDATE video SET intro = ?, source_hash = ?, m3u8_hash = ?, poster_hash = ?, \
                     thumb_hash = ?, sharpness = ?, episode = ?, total_episode = ?, updated_at = ?, \
                     version = version + 1 \
                     WHERE business_key = ? AND version = ?",
                )
                .bind(&video.intro)
                .bind(&video.source_hash)
                .bind(&video.m3u8_hash)
                .bind(&video.poster_hash)
                .bind(&video.thumb_hash)
                .bind(&video.sharpness)
                .bind(&video.episode)
                .bind(&video.total_episode)
                .bind(video.updated_at)
                .bind(&video.business_key)
                .bind(version)
                .execute(&self.pool)
                .await
                .map_err(|e| CatalogError::Sql(e.to_string()))?;
                Ok(result.rows_affected())
            }
        }
    }

    async fn insert_hash(&self, hash: &Hash) -> Result<u64, CatalogError> {
        let hash_type = serde_json::to_string(&hash.hash_type)
            .map_err(|e| CatalogError::Sql(e.to_string()))?
            .trim_matches('"')
            .to_string();
        let result = sqlx::query(
            "INSERT INTO hash (id, checksum, hash_type, episode, name, hash, sharpness, \
             caption, encrypt, key, m3u8, segment_file, resource) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&hash.id)
        .bind(&hash.checksum)
        .bind(hash_type)
        .bind(&hash.episode)
        .bind(&hash.name)
        .bind(&hash.hash)
        .bind(&hash.sharpness)
        .bind(&hash.caption)
        .bind(hash.encrypt)
        .bind(&hash.key)
        .bind(&hash.m3u8)
        .bind(&hash.segment_file)
        .bind(&hash.resource)
        .execute(&self.pool)
        .await
        .map_err(|e| CatalogError::Sql(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn is_exist(&self, business_key: &str) -> Result<bool, CatalogError> {
        Ok(self.current_version(business_key).await?.is_some())
    }

    async fn sync(&self) -> Result<(), CatalogError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS video (
                id TEXT PRIMARY KEY,
                business_key TEXT NOT NULL UNIQUE,
                intro TEXT NOT NULL DEFAULT '',
                alias TEXT NOT NULL DEFAULT '[]',
                role TEXT NOT NULL DEFAULT '[]',
                director TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                series TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL DEFAULT '',
                length TEXT NOT NULL DEFAULT '',
                producer TEXT NOT NULL DEFAULT '',
                publisher TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT '',
                caption TEXT NOT NULL DEFAULT '',
                format TEXT NOT NULL DEFAULT '2D',
                sharpness TEXT NOT NULL DEFAULT '',
                systematics TEXT NOT NULL DEFAULT '',
                season TEXT NOT NULL DEFAULT '1',
                episode TEXT NOT NULL DEFAULT '1',
                total_episode TEXT NOT NULL DEFAULT '1',
                kind TEXT NOT NULL DEFAULT '',
                uncensored INTEGER NOT NULL DEFAULT 0,
                source_hash TEXT NOT NULL DEFAULT '',
                m3u8_hash TEXT NOT NULL DEFAULT '',
                poster_hash TEXT NOT NULL DEFAULT '',
                thumb_hash TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                version INTEGER NOT NULL DEFAULT 1
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CatalogError::Sql(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hash (
                id TEXT PRIMARY KEY,
                checksum TEXT NOT NULL DEFAULT '',
                hash_type TEXT NOT NULL DEFAULT 'other',
                episode TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                hash TEXT NOT NULL DEFAULT '',
                sharpness TEXT NOT NULL DEFAULT '',
                caption TEXT NOT NULL DEFAULT '',
                encrypt INTEGER NOT NULL DEFAULT 0,
                key TEXT NOT NULL DEFAULT '',
                m3u8 TEXT NOT NULL DEFAULT '',
                segment_file TEXT NOT NULL DEFAULT '',
                resource TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CatalogError::Sql(e.to_string()))?;

        Ok(())
    }
}
