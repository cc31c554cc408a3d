// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable store persistence: load/save to JSON file with atomic writes.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Persisted key/value entries.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PersistedStore {
    #[serde(default)]
    pub entries: HashMap<String, PersistedEntry>,
}

/// A single persisted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub value: String,
    /// Expiry as epoch millis. Absent means the entry never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl PersistedEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// Load persisted entries from a JSON file. A missing file is an empty store.
pub fn load(path: &Path) -> anyhow::Result<PersistedStore> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PersistedStore::default()),
        Err(e) => return Err(e.into()),
    };
    let store: PersistedStore = serde_json::from_str(&contents)?;
    Ok(store)
}

/// Save entries to a JSON file atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent saves never share
/// a `.tmp` file.
pub fn save(path: &Path, store: &PersistedStore) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let json = serde_json::to_string_pretty(store)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
