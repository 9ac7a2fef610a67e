//! Clip library
//!
//! Owns the clip directory and the in-memory protection state: the set of
//! locked clips and the clip currently being written.

use super::clip::{is_clip_name, scan_clips, ClipRecord};
use crate::utils::error::{DashcamError, DashcamResult};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Clip directory plus lock and open-clip bookkeeping
pub struct ClipLibrary {
    dir: PathBuf,
    extension: String,
    locked: RwLock<HashSet<String>>,
    open_clip: RwLock<Option<String>>,
}

impl ClipLibrary {
    /// Open (and create if needed) the clip directory
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> DashcamResult<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            tracing::info!("Created recordings folder: {:?}", dir);
        }

        Ok(Self {
            dir,
            extension: extension.to_string(),
            locked: RwLock::new(HashSet::new()),
            open_clip: RwLock::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// All clips on disk, oldest first, with their lock state
    pub fn list(&self) -> DashcamResult<Vec<ClipRecord>> {
        let mut records = scan_clips(&self.dir, &self.extension)?;
        let locked = self.locked.read();
        for record in &mut records {
            record.locked = locked.contains(&record.name);
        }
        Ok(records)
    }

    /// Delete a clip on request. Open and locked clips are refused.
    pub fn delete(&self, name: &str) -> DashcamResult<ClipRecord> {
        let path = self.resolve(name)?;

        if self.is_open(name) {
            return Err(DashcamError::ClipOpen(name.to_string()));
        }
        if self.is_locked(name) {
            return Err(DashcamError::ClipLocked(name.to_string()));
        }

        let record = ClipRecord::from_path(&path)?;
        fs::remove_file(&path)?;
        tracing::info!("Deleted clip {} ({} bytes)", name, record.size_bytes);
        Ok(record)
    }

    /// Protect a clip from eviction. Returns false if it was already locked.
    pub fn lock(&self, name: &str) -> DashcamResult<bool> {
        // Resolve under the write lock so an eviction pass cannot remove the
        // file between the check and the insert
        let mut locked = self.locked.write();
        self.resolve(name)?;
        let inserted = locked.insert(name.to_string());
        drop(locked);
        if inserted {
            tracing::info!("Locked clip {}", name);
        }
        Ok(inserted)
    }

    /// Remove protection. Returns false if the clip was not locked.
    pub fn unlock(&self, name: &str) -> DashcamResult<bool> {
        if self.locked.write().remove(name) {
            tracing::info!("Unlocked clip {}", name);
            return Ok(true);
        }
        self.resolve(name)?;
        Ok(false)
    }

    /// Remove a clip chosen by an eviction pass.
    ///
    /// Returns `Ok(false)` without touching the file if the clip was locked
    /// or opened after the pass was planned. The lock set stays read-locked
    /// until the file is gone, so a concurrent `lock` either wins or fails
    /// with `NotFound`.
    pub fn evict(&self, clip: &ClipRecord) -> std::io::Result<bool> {
        let locked = self.locked.read();
        if locked.contains(&clip.name) || self.is_open(&clip.name) {
            return Ok(false);
        }
        fs::remove_file(&clip.path)?;
        Ok(true)
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.locked.read().contains(name)
    }

    /// Mark the clip currently being written (or clear it)
    pub fn set_open(&self, name: Option<String>) {
        *self.open_clip.write() = name;
    }

    pub fn open_clip(&self) -> Option<String> {
        self.open_clip.read().clone()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open_clip.read().as_deref() == Some(name)
    }

    /// Names eviction must never touch: locked clips and the open clip
    pub fn protected_names(&self) -> HashSet<String> {
        let mut names = self.locked.read().clone();
        if let Some(open) = self.open_clip.read().as_ref() {
            names.insert(open.clone());
        }
        names
    }

    /// Validate a user-supplied name and map it to an existing file
    fn resolve(&self, name: &str) -> DashcamResult<PathBuf> {
        let has_separator = name.contains('/') || name.contains('\\') || name.contains("..");
        if has_separator || !is_clip_name(name, &self.extension) {
            return Err(DashcamError::InvalidClipName(name.to_string()));
        }

        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(DashcamError::NotFound(name.to_string()));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CLIP_A: &str = "dashcam_20240101-120000-000.mp4";
    const CLIP_B: &str = "dashcam_20240101-120300-000.mp4";

    fn library_with_clips() -> (tempfile::TempDir, ClipLibrary) {
        let dir = tempdir().unwrap();
        let library = ClipLibrary::new(dir.path().join("recordings"), "mp4").unwrap();
        fs::write(library.dir().join(CLIP_A), vec![1u8; 100]).unwrap();
        fs::write(library.dir().join(CLIP_B), vec![2u8; 200]).unwrap();
        (dir, library)
    }

    #[test]
    fn test_new_creates_directory() {
        let (_dir, library) = library_with_clips();
        assert!(library.dir().is_dir());
        assert_eq!(library.list().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_clip() {
        let (_dir, library) = library_with_clips();
        let record = library.delete(CLIP_A).unwrap();
        assert_eq!(record.size_bytes, 100);
        assert!(!library.dir().join(CLIP_A).exists());

        assert!(matches!(library.delete(CLIP_A), Err(DashcamError::NotFound(_))));
    }

    #[test]
    fn test_delete_rejects_path_traversal() {
        let (_dir, library) = library_with_clips();
        assert!(matches!(
            library.delete("../dashcam_20240101-120000-000.mp4"),
            Err(DashcamError::InvalidClipName(_))
        ));
        assert!(matches!(library.delete("config.json"), Err(DashcamError::InvalidClipName(_))));
    }

    #[test]
    fn test_delete_refuses_locked_and_open() {
        let (_dir, library) = library_with_clips();

        assert!(library.lock(CLIP_A).unwrap());
        assert!(matches!(library.delete(CLIP_A), Err(DashcamError::ClipLocked(_))));

        library.set_open(Some(CLIP_B.to_string()));
        assert!(matches!(library.delete(CLIP_B), Err(DashcamError::ClipOpen(_))));

        library.set_open(None);
        assert!(library.delete(CLIP_B).is_ok());
    }

    #[test]
    fn test_lock_is_idempotent_and_listed() {
        let (_dir, library) = library_with_clips();

        assert!(library.lock(CLIP_B).unwrap());
        assert!(!library.lock(CLIP_B).unwrap());

        let records = library.list().unwrap();
        let locked: Vec<_> = records.iter().filter(|r| r.locked).map(|r| r.name.as_str()).collect();
        assert_eq!(locked, vec![CLIP_B]);

        assert!(library.unlock(CLIP_B).unwrap());
        assert!(!library.unlock(CLIP_B).unwrap());
        assert!(matches!(
            library.lock("dashcam_20990101-000000-000.mp4"),
            Err(DashcamError::NotFound(_))
        ));
    }

    #[test]
    fn test_evict_skips_clip_locked_after_listing() {
        let (_dir, library) = library_with_clips();
        let records = library.list().unwrap();

        library.lock(CLIP_A).unwrap();
        library.set_open(Some(CLIP_B.to_string()));

        assert!(!library.evict(&records[0]).unwrap());
        assert!(!library.evict(&records[1]).unwrap());
        assert!(library.dir().join(CLIP_A).exists());
        assert!(library.dir().join(CLIP_B).exists());

        library.set_open(None);
        assert!(library.evict(&records[1]).unwrap());
        assert!(!library.dir().join(CLIP_B).exists());
    }

    #[test]
    fn test_successful_lock_never_loses_to_eviction() {
        for _ in 0..50 {
            let (_dir, library) = library_with_clips();
            let library = std::sync::Arc::new(library);
            let record = library.list().unwrap().remove(0);
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));

            let evictor = {
                let library = library.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    library.evict(&record).unwrap()
                })
            };
            barrier.wait();
            let locked = library.lock(CLIP_A);
            let evicted = evictor.join().unwrap();

            match locked {
                Ok(true) => {
                    assert!(!evicted);
                    assert!(library.dir().join(CLIP_A).exists());
                }
                Err(DashcamError::NotFound(_)) => assert!(evicted),
                other => panic!("unexpected lock result: {:?}", other),
            }
        }
    }

    #[test]
    fn test_protected_names_include_open_clip() {
        let (_dir, library) = library_with_clips();
        library.lock(CLIP_A).unwrap();
        library.set_open(Some("dashcam_20240101-120600-000.mp4".to_string()));

        let protected = library.protected_names();
        assert_eq!(protected.len(), 2);
        assert!(protected.contains(CLIP_A));
        assert!(protected.contains("dashcam_20240101-120600-000.mp4"));
    }
}
