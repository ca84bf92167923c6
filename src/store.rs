use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Identifiers of casts already processed for delivery. Kept sorted so the
/// persisted file is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    ids: BTreeSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns true if `id` was not already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identifiers in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for SeenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// JSON-file persistence for the seen set.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted set. Never fails: a missing, unreadable, or
    /// malformed file yields an empty set.
    pub fn load(&self) -> SeenSet {
        if let Err(e) = ensure_parent_dir(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to create data directory: {:#}", e);
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "seen file not found, starting with empty seen set");
                return SeenSet::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read seen file");
                return SeenSet::new();
            }
        };

        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Array(items)) => {
                let seen: SeenSet = items.iter().filter_map(id_from_value).collect();
                tracing::debug!(path = %self.path.display(), count = seen.len(), "loaded seen set");
                seen
            }
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "unexpected format in seen file, list expected");
                SeenSet::new()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "invalid JSON in seen file");
                SeenSet::new()
            }
        }
    }

    /// Write the set as a sorted JSON list. The destination is replaced by
    /// rename, so readers never observe a partially written file.
    pub fn save(&self, seen: &SeenSet) -> Result<()> {
        ensure_parent_dir(&self.path)
            .with_context(|| format!("failed to create directory for {}", self.path.display()))?;

        let data = serde_json::to_string_pretty(&seen.ids).context("failed to serialize seen set")?;
        let tmp = self.temp_path();

        let written = write_synced(&tmp, data.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("failed to save {}", self.path.display()));
        }

        tracing::debug!(path = %self.path.display(), count = seen.len(), "saved seen set");
        Ok(())
    }

    /// Sibling of the destination so the rename never crosses filesystems.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "seen".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
    }
}

fn id_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SeenStore {
        SeenStore::new(dir.path().join("data").join("seen_casts.json"))
    }

    #[test]
    fn test_missing_file_is_empty_and_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().is_empty());
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let seen: SeenSet = ["0xc", "0xa", "0xb"].into_iter().collect();
        store.save(&seen).unwrap();
        assert_eq!(store.load(), seen);
    }

    #[test]
    fn test_saved_file_is_sorted_json_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let seen: SeenSet = ["zeta", "alpha", "mu"].into_iter().collect();
        store.save(&seen).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let parsed: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, vec!["alpha", "mu", "zeta"]);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&["0x1"].into_iter().collect()).unwrap();
        store.save(&["0x1", "0x2"].into_iter().collect()).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("data"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["seen_casts.json"]);
        assert_eq!(store.load().len(), 2);
    }

    #[test]
    fn test_corrupt_json_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(store.path(), "[\"0x1\", ").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_object_instead_of_list_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(store.path(), r#"{"seen": ["0x1"]}"#).unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_non_string_items_are_stringified() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(store.path(), r#"["0x1", 42, null, {"a": 1}]"#).unwrap();
        let seen = store.load();
        assert_eq!(seen.iter().collect::<Vec<_>>(), vec!["0x1", "42"]);
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&["0x1"].into_iter().collect()).unwrap();

        // A directory squatting on the temp name makes the write fail
        std::fs::create_dir_all(store.temp_path()).unwrap();
        let result = store.save(&["0x1", "0x2"].into_iter().collect());
        assert!(result.is_err());
        assert_eq!(store.load().iter().collect::<Vec<_>>(), vec!["0x1"]);
    }

    #[test]
    fn test_insert_reports_novelty() {
        let mut seen = SeenSet::new();
        assert!(seen.insert("0x1"));
        assert!(!seen.insert("0x1".to_string()));
        assert!(seen.contains("0x1"));
        assert_eq!(seen.len(), 1);
    }
}
