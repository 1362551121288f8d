use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::models::{NewPanel, Panel};

/// `GET /panels` never returns more than this many rows.
pub const RECENT_LIMIT: i64 = 50;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("conflict")]
    Conflict,
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Append-only panel metadata. Implementations never update or delete rows.
#[async_trait]
pub trait PanelRepo: Send + Sync {
    async fn insert_panel(&self, new: NewPanel) -> RepoResult<Panel>;
    /// Newest first, at most `limit` rows, optionally restricted to one chain
    /// (filter applies before the limit).
    async fn recent_panels(&self, chain_id: Option<&str>, limit: i64) -> RepoResult<Vec<Panel>>;
    async fn panel_ids(&self) -> RepoResult<HashSet<String>>;
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS panels (
        id        TEXT PRIMARY KEY,
        chainId   TEXT NOT NULL,
        authorId  TEXT NOT NULL,
        imagePath TEXT NOT NULL,
        thumbPath TEXT NOT NULL,
        createdAt INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_panels_created ON panels (createdAt DESC)",
    "CREATE INDEX IF NOT EXISTS idx_panels_chain_created ON panels (chainId, createdAt DESC)",
];

const COLUMNS: &str = "id, chainId, authorId, imagePath, thumbPath, createdAt";

#[derive(Clone)]
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Opens (creating if needed) the database file and ensures the schema.
    pub async fn open(path: &Path) -> RepoResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepoError::Database(sqlx::Error::Io(e)))?;
        }
        // a path, not a URL: `?`, `#` and `%` in directory names stay literal
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    /// Private in-memory database; a single connection so every query sees
    /// the same data.
    pub async fn in_memory() -> RepoResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    /// Idempotent; safe against an existing store.
    pub async fn ensure_schema(&self) -> RepoResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PanelRepo for SqliteRepo {
    async fn insert_panel(&self, new: NewPanel) -> RepoResult<Panel> {
        let panel = Panel {
            id: new.id,
            chain_id: new.chain_id,
            author_id: new.author_id,
            image_path: new.image_path,
            thumb_path: new.thumb_path,
            created_at: Utc::now().timestamp_millis(),
        };
        let res = sqlx::query(
            "INSERT INTO panels (id, chainId, authorId, imagePath, thumbPath, createdAt) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&panel.id)
        .bind(&panel.chain_id)
        .bind(&panel.author_id)
        .bind(&panel.image_path)
        .bind(&panel.thumb_path)
        .bind(panel.created_at)
        .execute(&self.pool)
        .await;
        match res {
            Ok(_) => Ok(panel),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(RepoError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn recent_panels(&self, chain_id: Option<&str>, limit: i64) -> RepoResult<Vec<Panel>> {
        let rows = match chain_id {
            Some(chain) => {
                sqlx::query_as::<_, Panel>(&format!(
                    "SELECT {COLUMNS} FROM panels WHERE chainId = ? ORDER BY createdAt DESC, rowid DESC LIMIT ?"
                ))
                .bind(chain)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Panel>(&format!(
                    "SELECT {COLUMNS} FROM panels ORDER BY createdAt DESC, rowid DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn panel_ids(&self) -> RepoResult<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM panels")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }
}
