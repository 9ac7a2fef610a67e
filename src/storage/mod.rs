//! Clip storage
//!
//! - ClipRecord and directory scanning
//! - ClipLibrary for listing, deleting and locking clips
//! - StorageGuard for oldest-first eviction under a byte budget

pub mod clip;
pub mod guard;
pub mod library;

pub use clip::ClipRecord;
pub use guard::{plan_eviction, EvictionPlan, EvictionReport, StorageGuard};
pub use library::ClipLibrary;
