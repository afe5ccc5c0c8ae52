//! Build manifest: which emitted asset belongs to which source module.
//!
//! The manifest is rebuilt from scratch after every successful build and
//! written next to the assets as `manifest.json`. Keys are sorted so two
//! builds of identical source produce byte-identical manifests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// File name of the manifest inside the static output directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Hex characters of the blake3 digest kept as the asset hash.
const HASH_LEN: usize = 16;

/// Descriptor of one emitted asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Path of the emitted file relative to the output directory
    pub file: String,

    /// Content hash for cache busting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Whether this asset is the compiled client entry
    #[serde(default)]
    pub is_entry: bool,
}

/// Mapping from source module identifier to emitted asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildManifest {
    entries: BTreeMap<String, AssetEntry>,
}

impl BuildManifest {
    /// Describe every file in `out_dir`.
    ///
    /// The file named `<file_name>.js` (or `.mjs`) is keyed by `entry_id`,
    /// the client entry's source identifier. Every other file is keyed by its
    /// own relative path.
    pub fn scan(out_dir: &Path, entry_id: &str, file_name: &str) -> std::io::Result<Self> {
        let mut entries = BTreeMap::new();

        for entry in WalkDir::new(out_dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = match entry.path().strip_prefix(out_dir) {
                Ok(p) => p.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if relative == MANIFEST_FILE_NAME {
                continue;
            }

            let content = std::fs::read(entry.path())?;
            let is_entry = is_entry_file(&relative, file_name);
            let key = if is_entry {
                entry_id.to_string()
            } else {
                relative.clone()
            };

            entries.insert(
                key,
                AssetEntry {
                    file: relative,
                    hash: Some(content_hash(&content)),
                    is_entry,
                },
            );
        }

        Ok(Self { entries })
    }

    /// Write `manifest.json` into `out_dir`.
    pub fn write_to(&self, out_dir: &Path) -> Result<(), crate::error::BuildError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(out_dir.join(MANIFEST_FILE_NAME), json)?;
        Ok(())
    }

    /// Look up the asset emitted for a source module.
    pub fn get(&self, id: &str) -> Option<&AssetEntry> {
        self.entries.get(id)
    }

    /// The compiled client entry, if the build emitted one.
    pub fn entry(&self) -> Option<&AssetEntry> {
        self.entries.values().find(|asset| asset.is_entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_entry_file(relative: &str, file_name: &str) -> bool {
    relative == format!("{}.js", file_name) || relative == format!("{}.mjs", file_name)
}

/// Truncated blake3 digest of `content`.
pub fn content_hash(content: &[u8]) -> String {
    let hex = blake3::hash(content).to_hex();
    hex.as_str()[..HASH_LEN].to_string()
}
