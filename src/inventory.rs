// src/inventory.rs

use crate::integrity::{IntegrityError, IntegrityVerifier, VerifyResult};
use crate::models::{Checksum, IdentityKey};
use chrono::NaiveDateTime;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

/// Folder under the download root that receives files no longer in the catalog.
pub const ORPHANED_DIR: &str = "orphaned";

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IntegrityError> for InventoryError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::Io(e) => InventoryError::Io(e),
        }
    }
}

/// A file this tool placed on disk, as remembered between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacedFile {
    pub identity_key: IdentityKey,
    /// Relative to the download root.
    pub relative_path: PathBuf,
    pub size_bytes: u64,
    pub checksum: Option<Checksum>,
    pub placed_at: NaiveDateTime,
}

/// Ledger of placed files, kept in an SQLite database.
///
/// The ledger is only used for reporting and orphan detection; whether a file
/// needs downloading is always decided by checking the file itself.
pub struct Inventory {
    conn: Connection,
}

impl Inventory {
    /// Opens (and creates if needed) the ledger at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, InventoryError> {
        let conn = Connection::open(db_path).await?;
        let inventory = Self { conn };
        inventory.setup_database().await?;
        Ok(inventory)
    }

    pub async fn open_in_memory() -> Result<Self, InventoryError> {
        let conn = Connection::open_in_memory().await?;
        let inventory = Self { conn };
        inventory.setup_database().await?;
        Ok(inventory)
    }

    async fn setup_database(&self) -> Result<(), InventoryError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS placed_files (
                        identity_key    TEXT PRIMARY KEY,
                        file_data       TEXT NOT NULL
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Inserts or replaces the rows for `files`.
    pub async fn record(&self, files: &[PlacedFile]) -> Result<(), InventoryError> {
        let rows = files
            .iter()
            .map(|file| -> Result<(String, String), serde_json::Error> {
                Ok((serde_json::to_string(&file.identity_key)?, serde_json::to_string(file)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (key, data) in &rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO placed_files (identity_key, file_data) VALUES (?1, ?2)",
                        params![key, data],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn load_all(&self) -> Result<Vec<PlacedFile>, InventoryError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT file_data FROM placed_files")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let mut files = Vec::with_capacity(rows.len());
        for data in rows {
            files.push(serde_json::from_str(&data)?);
        }
        Ok(files)
    }

    pub async fn remove(&self, key: &IdentityKey) -> Result<(), InventoryError> {
        let key = serde_json::to_string(key)?;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM placed_files WHERE identity_key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Moves previously placed files whose content no longer appears in the
    /// catalog into `root/orphaned/`, and forgets them. Returns the new paths.
    pub async fn relocate_orphans(
        &self,
        root: &Path,
        catalog: &HashSet<IdentityKey>,
        verifier: &IntegrityVerifier,
    ) -> Result<Vec<PathBuf>, InventoryError> {
        let mut moved = Vec::new();
        for placed in self.load_all().await? {
            if catalog.contains(&placed.identity_key) {
                continue;
            }
            let current = root.join(&placed.relative_path);
            match verifier
                .verify_against(&current, placed.size_bytes, placed.checksum.as_ref())
                .await?
            {
                VerifyResult::Match => {
                    let target = free_path(&root.join(ORPHANED_DIR).join(&placed.relative_path)).await;
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    warn!(from = %current.display(), to = %target.display(), "moving orphaned file");
                    tokio::fs::rename(&current, &target).await?;
                    moved.push(target);
                }
                VerifyResult::Missing => {
                    debug!(path = %current.display(), "orphan already moved");
                }
                VerifyResult::Mismatch(mismatch) => {
                    warn!(path = %current.display(), "leaving orphan in place: {mismatch}");
                }
            }
            self.remove(&placed.identity_key).await?;
        }
        Ok(moved)
    }
}

/// First of `path`, `path.1`, `path.2`, … that does not exist yet.
async fn free_path(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    let mut i = 1;
    while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{i}"));
        candidate = PathBuf::from(name);
        i += 1;
    }
    candidate
}
