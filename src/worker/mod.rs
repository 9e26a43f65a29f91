//! The offline cache manager and its pending-submission queue.
//!
//! This module owns everything stateful about the worker:
//! - Generation lifecycle (install, activate, cleanup of stale stores)
//! - Strategy dispatch for intercepted requests
//! - Control-message handling
//! - Deferred submission replay on background sync

mod manager;
mod queue;

pub use manager::{CacheManager, ClientNotice, LifecycleState};
pub use queue::{QueuedSubmission, PENDING_STORE, SUBMISSION_SYNC_TAG};
