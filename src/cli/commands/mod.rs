//! CLI command implementations

pub mod build;
pub mod config;
pub mod dir;
pub mod key;
pub mod list;

pub use build::execute as build;
pub use config::execute as config;
pub use dir::execute as dir;
pub use key::execute as key;
pub use list::execute as list;
