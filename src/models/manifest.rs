use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Manifest format written by this engine
pub const MANIFEST_VERSION: u32 = 3;

/// Per-shard entry of a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Maximum `updatedAt` among the shard's records
    pub updated_at: i64,
}

/// Directory of all shard paths and their latest known `updatedAt`
///
/// ```json
/// {"version": 3, "lastUpdated": 1735100000000,
///  "files": {"life-habits-data/todo/all.json": {"updatedAt": 1735000000000}}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub files: BTreeMap<String, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            last_updated: 0,
            files: BTreeMap::new(),
        }
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updated_at(&self, path: &str) -> Option<i64> {
        self.files.get(path).map(|entry| entry.updated_at)
    }

    pub fn set(&mut self, path: impl Into<String>, updated_at: i64) {
        self.files.insert(path.into(), ManifestEntry { updated_at });
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
