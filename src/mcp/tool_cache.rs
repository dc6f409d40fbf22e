//! Last-known tool lists per server, persisted between runs.
//!
//! Reads never fail: a missing or corrupt file is an empty cache. Writes are
//! best-effort and only logged when they fail.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::config::io::{config_dir, write_atomically};
use crate::core::tools::ToolSpec;

pub const TOOL_CACHE_FILE_NAME: &str = "mcp-tools-cache.json";

pub fn default_tool_cache_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(TOOL_CACHE_FILE_NAME))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCache {
    #[serde(default)]
    pub servers: BTreeMap<String, Vec<ToolSpec>>,
}

impl ToolCache {
    pub fn load(path: &Path) -> Self {
        let Ok(contents) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&contents) {
            Ok(cache) => cache,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Ignoring unreadable tool cache");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) {
        let result = serde_json::to_vec_pretty(self)
            .map_err(|err| err.to_string())
            .and_then(|bytes| write_atomically(path, &bytes).map_err(|err| err.to_string()));
        if let Err(err) = result {
            debug!(path = %path.display(), error = %err, "Failed to write tool cache");
        }
    }

    pub fn tools(&self, server: &str) -> Option<&[ToolSpec]> {
        self.servers.get(server).map(Vec::as_slice)
    }

    /// Replaces the entry for `server` on disk, keeping other servers.
    pub fn record(path: &Path, server: &str, tools: Vec<ToolSpec>) {
        let mut cache = Self::load(path);
        cache.servers.insert(server.to_string(), tools);
        cache.save(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ToolCache::load(&dir.path().join(TOOL_CACHE_FILE_NAME));
        assert!(cache.servers.is_empty());
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(TOOL_CACHE_FILE_NAME);
        fs::write(&path, "{not json").expect("write");
        assert_eq!(ToolCache::load(&path), ToolCache::default());
    }

    #[test]
    fn record_keeps_other_servers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(TOOL_CACHE_FILE_NAME);

        ToolCache::record(&path, "fs", vec![spec("read_file")]);
        ToolCache::record(&path, "git", vec![spec("status"), spec("log")]);
        ToolCache::record(&path, "fs", vec![spec("write_file")]);

        let cache = ToolCache::load(&path);
        assert_eq!(cache.servers.len(), 2);
        assert_eq!(cache.tools("fs").expect("fs")[0].name, "write_file");
        assert_eq!(cache.tools("git").expect("git").len(), 2);
    }

    #[test]
    fn file_layout_nests_servers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(TOOL_CACHE_FILE_NAME);
        ToolCache::record(&path, "fs", vec![spec("read_file")]);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["servers"]["fs"][0]["name"], "read_file");
    }

    #[test]
    fn save_to_unwritable_path_is_silent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").expect("write");
        ToolCache::default().save(&blocker.join("cache.json"));
    }
}
