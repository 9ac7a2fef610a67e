//! Clip records and directory scanning
//!
//! There is no metadata store: a clip's size and creation time come straight
//! from filesystem attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name prefix shared by every clip
pub const CLIP_PREFIX: &str = "dashcam_";

/// A closed (or currently listed) clip on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRecord {
    /// File name, used as the clip identifier
    pub name: String,

    /// Full path to the file
    pub path: PathBuf,

    /// Creation time (modification time where the filesystem lacks birth time)
    pub created: DateTime<Utc>,

    /// Size in bytes
    pub size_bytes: u64,

    /// Protected from eviction
    pub locked: bool,
}

impl ClipRecord {
    /// Build a record from the file's metadata
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let created = metadata.created().or_else(|_| metadata.modified())?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            name,
            path: path.to_path_buf(),
            created: DateTime::<Utc>::from(created),
            size_bytes: metadata.len(),
            locked: false,
        })
    }
}

/// Whether `name` looks like a clip with the given extension
pub fn is_clip_name(name: &str, extension: &str) -> bool {
    name.starts_with(CLIP_PREFIX)
        && name
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| ext == extension && stem.len() > CLIP_PREFIX.len())
}

/// Sort oldest first; names break ties since they embed the capture time
pub fn sort_oldest_first(records: &mut [ClipRecord]) {
    records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
}

/// List every clip in `dir`, oldest first
pub fn scan_clips(dir: &Path, extension: &str) -> std::io::Result<Vec<ClipRecord>> {
    let mut records = Vec::new();

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_clip = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| is_clip_name(n, extension));
        if !is_clip {
            continue;
        }

        // A clip may vanish between read_dir and stat (deleted concurrently)
        match ClipRecord::from_path(&path) {
            Ok(record) => records.push(record),
            Err(e) => tracing::debug!("Skipping {:?}: {}", path, e),
        }
    }

    sort_oldest_first(&mut records);
    Ok(records)
}
