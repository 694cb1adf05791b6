//! Staged install, update and rollback of an installation.
//!
//! An [`Installation`] ties together the artifact cache, the trust store and
//! the revision history of one installation directory. Repository access and
//! file layout are injected through [`ArtifactResolver`] and [`Provisioner`];
//! [`LocalRepository`] and [`CopyProvisioner`] are the bundled
//! implementations.

pub mod config;
pub mod error;
pub mod installation;
pub mod lock;
pub mod origin;
pub mod provisioner;
pub mod reconcile;
pub mod repository;

pub use config::{InstallationConfig, Settings, TrackedFile, CONFIG_FILE};
pub use error::{ProvisionError, Result};
pub use installation::{Installation, Services, StagedUpdate, UpdateOptions};
pub use lock::{InstallLock, LOCK_FILE};
pub use origin::{track_file, verify_origin, InvalidBinary, VerificationReport};
pub use provisioner::{CopyProvisioner, ProvisionedArtifact, Provisioner};
pub use reconcile::{discover, reconcile, Discovered};
pub use repository::{ArtifactResolver, LocalRepository, ResolvedArtifact};
