//! Revision history of an installation.
//!
//! Every mutating operation appends exactly one [`Revision`] pointing at a
//! content-addressed [`Snapshot`] of the channels, channel versions and
//! manifests in effect afterwards. History is never rewritten; a rollback is
//! itself a new revision.

pub mod compare;
pub mod error;
pub mod log;
pub mod revision;

pub use compare::{compare, RevisionDiff};
pub use error::{HistoryError, Result};
pub use log::{RevisionLog, HISTORY_DIR, LOG_FILE, SNAPSHOTS_DIR};
pub use revision::{Revision, RevisionKind, Snapshot};
