//! Content-addressed artifact cache
//!
//! Artifacts are stored under a cache root, named by a key derived from
//! everything that affects the build. Same inputs = same file.
//!
//! # Concurrency
//!
//! - Processes sharing a root serialize builds of one key with an advisory
//!   lock file next to the artifact
//! - Artifacts are published by rename, so readers never see a partial file
//! - Within a process, the registry makes concurrent callers of one key
//!   wait for a single load
//!
//! # Artifact States
//!
//! | State | On disk | Description |
//! |-------|---------|-------------|
//! | Miss | nothing (or only the lock file) | Never built, or every build failed |
//! | Building | `.kiln-build-*` staging dir | Lock held by the builder |
//! | Published | `{name}_{key}{suffix}` | Complete, reused by later calls |

pub mod key;
pub mod lock;
pub mod marker;
pub mod registry;
pub mod store;

pub use key::{CacheKey, Identity};
pub use lock::{ExclusiveLock, FileLock, FileLockGuard};
pub use registry::ProcessRegistry;
pub use store::{ArtifactPaths, ArtifactStore, StoredArtifact};
