//! Building and loading artifacts

pub mod coordinator;
pub mod loader;
pub mod request;
pub mod toolchain;

pub use coordinator::{BuildCoordinator, BuildPlan};
pub use loader::{DylibLoader, LoadTarget, LoadedModule, Loader};
pub use request::{ArtifactKind, BuildOptions, BuildRequest, Language};
pub use toolchain::{BuildJob, CcToolchain, Toolchain};
