//! Storage budget enforcement
//!
//! One eviction pass runs per clip rotation. Clips are removed oldest first
//! until the directory fits the budget. Locked clips and the open clip are
//! never candidates; when they alone exceed the budget the pass stalls and
//! reports a warning instead of touching them.

use super::clip::{sort_oldest_first, ClipRecord};
use super::library::ClipLibrary;
use crate::utils::error::{DashcamError, DashcamResult};

/// Outcome of planning an eviction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Clips to delete, oldest first
    pub victims: Vec<ClipRecord>,

    /// Bytes left once every victim is gone (protected clips included)
    pub remaining_bytes: u64,

    /// Budget still exceeded after all eligible clips are planned for removal
    pub stalled: bool,
}

/// Decide which clips to evict.
///
/// `eligible` must already exclude protected clips; their combined size is
/// passed as `protected_bytes` so the budget covers the whole directory.
pub fn plan_eviction(eligible: &[ClipRecord], protected_bytes: u64, budget: u64) -> EvictionPlan {
    let mut ordered = eligible.to_vec();
    sort_oldest_first(&mut ordered);

    let mut total: u64 = protected_bytes + ordered.iter().map(|c| c.size_bytes).sum::<u64>();
    let mut victims = Vec::new();

    for clip in ordered {
        if total <= budget {
            break;
        }
        total -= clip.size_bytes;
        victims.push(clip);
    }

    EvictionPlan {
        victims,
        remaining_bytes: total,
        stalled: total > budget,
    }
}

/// What an executed eviction pass did
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    /// Clips actually removed
    pub evicted: Vec<ClipRecord>,

    /// Victims that were locked after the pass was planned
    pub skipped: Vec<ClipRecord>,

    /// Clips whose deletion failed, with the error; retried next pass
    pub failed: Vec<(ClipRecord, String)>,

    /// Bytes on disk after the pass
    pub remaining_bytes: u64,

    /// Bytes held by locked/open clips
    pub protected_bytes: u64,

    /// Budget could not be met without touching protected clips
    pub stalled: bool,
}

impl EvictionReport {
    pub fn freed_bytes(&self) -> u64 {
        self.evicted.iter().map(|c| c.size_bytes).sum()
    }
}

/// Enforces the byte budget over a clip library
pub struct StorageGuard;

impl StorageGuard {
    /// Run one eviction pass
    pub fn enforce(library: &ClipLibrary, budget: u64) -> DashcamResult<EvictionReport> {
        let clips = library
            .list()
            .map_err(|e| DashcamError::Storage(format!("failed to scan clips: {}", e)))?;
        let protected = library.protected_names();

        let (protected_clips, eligible): (Vec<_>, Vec<_>) = clips
            .into_iter()
            .partition(|c| c.locked || protected.contains(&c.name));
        let protected_bytes: u64 = protected_clips.iter().map(|c| c.size_bytes).sum();

        let plan = plan_eviction(&eligible, protected_bytes, budget);
        tracing::debug!(
            "Eviction pass: {} eligible, {} protected bytes, {} victims",
            eligible.len(),
            protected_bytes,
            plan.victims.len()
        );

        let mut report = EvictionReport {
            remaining_bytes: plan.remaining_bytes,
            protected_bytes,
            stalled: plan.stalled,
            ..Default::default()
        };

        for clip in plan.victims {
            match library.evict(&clip) {
                Ok(true) => {
                    tracing::info!("Removing old clip: {} ({} bytes)", clip.name, clip.size_bytes);
                    report.evicted.push(clip);
                }
                Ok(false) => {
                    // Locked while the pass was running
                    tracing::debug!("Clip {} became protected, keeping it", clip.name);
                    report.remaining_bytes += clip.size_bytes;
                    report.protected_bytes += clip.size_bytes;
                    report.skipped.push(clip);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Deleted out from under us; the space is gone either way
                    tracing::debug!("Clip {} already removed", clip.name);
                }
                Err(e) => {
                    tracing::error!("Failed to remove clip {}: {}", clip.name, e);
                    report.remaining_bytes += clip.size_bytes;
                    report.failed.push((clip, e.to_string()));
                }
            }
        }

        if report.stalled {
            tracing::warn!(
                "Storage budget of {} bytes cannot be met: {} bytes are locked or in use",
                budget,
                protected_bytes
            );
        } else if report.remaining_bytes > budget {
            tracing::warn!(
                "Storage over budget by {} bytes after skipped or failed deletions; retrying next rotation",
                report.remaining_bytes - budget
            );
        }

        Ok(report)
    }
}
