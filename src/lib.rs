//! Kiln - compile once, load anywhere
//!
//! Turns C/C++ source text into a loaded shared library, reusing earlier
//! builds of the same inputs and making sure concurrent processes never
//! build the same artifact twice.
//!
//! ```ignore
//! use kiln::BuildRequest;
//!
//! let module = kiln::compile(&BuildRequest::new("int add(int x, int y) { return x + y; }"))?;
//! let add = unsafe { module.get::<extern "C" fn(i32, i32) -> i32>("add")? };
//! assert_eq!(add(3, 4), 7);
//! ```

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod ui;

pub use build::coordinator::{compile, global};
pub use build::{
    ArtifactKind, BuildCoordinator, BuildOptions, BuildRequest, Language, LoadedModule,
};
pub use cache::CacheKey;
pub use error::{KilnError, KilnResult};
