// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key/value storage backends with per-entry expiry.
//!
//! [`MemoryStore`] is session-scoped: it lives as long as the process.
//! [`FileStore`] is durable: every write is flushed to a JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::credential::persist::{self, PersistedEntry, PersistedStore};

/// Minimal storage contract used for credentials and session state.
///
/// Expired entries read as absent.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

fn entry(value: &str, ttl: Option<Duration>) -> PersistedEntry {
    let expires_at_ms = ttl.map(|t| {
        let ttl_ms = u64::try_from(t.as_millis()).unwrap_or(u64::MAX);
        epoch_ms().saturating_add(ttl_ms)
    });
    PersistedEntry { value: value.to_owned(), expires_at_ms }
}

/// In-memory store, cleared when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, PersistedEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.is_expired(epoch_ms()) => {
                entries.remove(key);
                None
            }
            Some(e) => Some(e.value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_owned(), entry(value, ttl));
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Durable store backed by a JSON file.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, PersistedEntry>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. Expired entries are dropped on load.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let mut loaded = persist::load(&path)?;
        let now = epoch_ms();
        loaded.entries.retain(|_, e| !e.is_expired(now));
        Ok(Self { path, entries: Mutex::new(loaded.entries) })
    }

    /// Open `credentials.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> anyhow::Result<Self> {
        Self::open(dir.join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, PersistedEntry>) -> anyhow::Result<()> {
        persist::save(&self.path, &PersistedStore { entries: entries.clone() })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries.get(key).filter(|e| !e.is_expired(epoch_ms())).map(|e| e.value.clone())
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_owned(), entry(value, ttl));
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() && !self.path.exists() {
            return Ok(());
        }
        self.flush(&entries)
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
