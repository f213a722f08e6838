//! Loading migration sets from disk and from exported JSON bundles.
//!
//! A migrations directory holds one `<id>_<name>.sql` file per script, the
//! id being a numeric (usually timestamp) prefix. At build time the
//! directory can be exported to a JSON bundle that ships inside the binary.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::migration::Migration;
use crate::set::MigrationSet;
use crate::types::{Fingerprint, MigrationId};

/// One entry of an exported bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BundleEntry {
    id: MigrationId,
    name: String,
    body: String,
    fingerprint: Fingerprint,
}

impl MigrationSet {
    /// Load every `*.sql` file in `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut scripts = Vec::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }

            let (id, name) = parse_file_name(&path)?;
            let body = fs::read_to_string(&path)?;
            scripts.push(Migration::new(id, name, body));
        }

        let set = Self::new(scripts)?;
        tracing::debug!(dir = %dir.display(), count = set.len(), "loaded migrations");
        Ok(set)
    }

    /// Parse a bundle produced by [`MigrationSet::to_json`].
    ///
    /// Fingerprints are taken from the bundle as-is.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<BundleEntry> = serde_json::from_str(json)?;
        Self::new(
            entries
                .into_iter()
                .map(|e| Migration::with_fingerprint(e.id, e.name, e.body, e.fingerprint)),
        )
    }

    /// Export the set as a JSON bundle, in application order.
    pub fn to_json(&self) -> Result<String> {
        let entries: Vec<BundleEntry> = self
            .iter()
            .map(|m| BundleEntry {
                id: m.id(),
                name: m.name().to_string(),
                body: m.body().to_string(),
                fingerprint: m.fingerprint(),
            })
            .collect();
        Ok(serde_json::to_string(&entries)?)
    }
}

/// Split `<id>_<name>.sql` into its parts.
fn parse_file_name(path: &Path) -> Result<(MigrationId, String)> {
    let invalid = || MigrationError::InvalidFileName(path.to_path_buf());

    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(invalid)?;
    let (prefix, name) = stem.split_once('_').ok_or_else(invalid)?;
    let id: u64 = prefix.parse().map_err(|_| invalid())?;
    if name.is_empty() {
        return Err(invalid());
    }

    Ok((MigrationId(id), name.to_string()))
}
