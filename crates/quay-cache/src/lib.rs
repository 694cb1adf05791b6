//! Content-verified local artifact cache.
//!
//! The provisioning engine asks the cache before falling back to a
//! repository, and records every artifact it fetched. A cached file is only
//! ever returned while its bytes still hash to the recorded value, so an
//! externally modified or stale file degrades to a cache miss.

pub mod cache;
pub mod error;
pub mod index;

pub use cache::{ArtifactCache, CACHE_DIR, INDEX_FILE};
pub use error::{CacheError, Result};
pub use index::{CachedEntry, Provenance};
