//! Durable backing store for the IP allocator.
//!
//! The allocator only requires a store that honors the [`IPAllocationStore`]
//! contract; this crate ships a JSON-file-backed implementation (one row per
//! agent, matching the `agent_id TEXT PRIMARY KEY, ip_address TEXT NOT NULL
//! UNIQUE, last_seen TIMESTAMP` schema from the wire spec) so the allocator
//! is durable and testable without a real database dependency.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AllocationError, Result};

/// One row of the allocation table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub agent_id: String,
    pub ip_address: Ipv4Addr,
    pub last_seen: DateTime<Utc>,
}

/// Durable storage contract the allocator depends on. Implementations must
/// make `upsert`/`delete` visible to a subsequent `load_all` call (no
/// write-behind caching) since the allocator persists before returning.
pub trait IPAllocationStore: Send + Sync {
    /// Loads every persisted `(agent_id, ip)` tuple, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the backing medium cannot be read.
    fn load_all(&self) -> Result<Vec<AllocationRow>>;

    /// Inserts or updates the row for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the write fails.
    fn upsert(&self, row: &AllocationRow) -> Result<()>;

    /// Deletes the row for `agent_id`, if present. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the write fails.
    fn delete(&self, agent_id: &str) -> Result<()>;
}

/// A JSON file holding the entire allocation table, rewritten atomically
/// (write to a sibling temp file, then rename) on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    rows: std::sync::Mutex<HashMap<String, AllocationRow>>,
}

impl JsonFileStore {
    /// Opens (or creates) the JSON file at `path`, loading any existing
    /// rows into memory.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the file exists but cannot be
    /// parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rows = if path.exists() {
            read_rows(&path)?
        } else {
            HashMap::new()
        };
        Ok(Self { path, rows: std::sync::Mutex::new(rows) })
    }

    fn flush(&self, rows: &HashMap<String, AllocationRow>) -> Result<()> {
        write_rows(&self.path, rows)
    }
}

fn read_rows(path: &Path) -> Result<HashMap<String, AllocationRow>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AllocationError::Store(format!("reading {}: {e}", path.display())))?;
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let list: Vec<AllocationRow> = serde_json::from_str(&content)
        .map_err(|e| AllocationError::Store(format!("parsing {}: {e}", path.display())))?;
    Ok(list.into_iter().map(|row| (row.agent_id.clone(), row)).collect())
}

fn write_rows(path: &Path, rows: &HashMap<String, AllocationRow>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AllocationError::Store(format!("creating {}: {e}", parent.display())))?;
        }
    }
    let mut list: Vec<&AllocationRow> = rows.values().collect();
    list.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    let content = serde_json::to_string_pretty(&list)
        .map_err(|e| AllocationError::Store(format!("serializing allocation table: {e}")))?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)
        .map_err(|e| AllocationError::Store(format!("writing {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| AllocationError::Store(format!("renaming into {}: {e}", path.display())))?;
    Ok(())
}

impl IPAllocationStore for JsonFileStore {
    fn load_all(&self) -> Result<Vec<AllocationRow>> {
        Ok(self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values().cloned().collect())
    }

    fn upsert(&self, row: &AllocationRow) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rows.insert(row.agent_id.clone(), row.clone());
        self.flush(&rows)
    }

    fn delete(&self, agent_id: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rows.remove(agent_id);
        self.flush(&rows)
    }
}

/// A non-persistent store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: std::sync::Mutex<HashMap<String, AllocationRow>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IPAllocationStore for InMemoryStore {
    fn load_all(&self) -> Result<Vec<AllocationRow>> {
        Ok(self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values().cloned().collect())
    }

    fn upsert(&self, row: &AllocationRow) -> Result<()> {
        self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(row.agent_id.clone(), row.clone());
        Ok(())
    }

    fn delete(&self, agent_id: &str) -> Result<()> {
        self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(agent_id);
        Ok(())
    }
}
