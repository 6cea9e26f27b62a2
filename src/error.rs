//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Input errors
    #[error("Expected exactly one KILN_MODULE(name, entry) marker in the source, found {found}")]
    ModuleMarkerCount { found: usize },

    #[error("Malformed KILN_MODULE marker on line {line}: {reason}")]
    ModuleMarkerMalformed { line: usize, reason: String },

    #[error("A base name cannot be given for module builds; it comes from the KILN_MODULE marker (got '{0}')")]
    NameWithModuleMarker(String),

    #[error("Invalid base name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Failed to read dependency file {path}: {source}")]
    DependencyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid build option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    // Toolchain errors
    #[error("Compiler not found: {compiler}: {source}")]
    ToolchainNotFound {
        compiler: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine version of compiler {compiler}: {reason}")]
    ToolchainVersion { compiler: String, reason: String },

    #[error("Build of {module} failed ({status}): {command}\n{diagnostics}")]
    Build {
        module: String,
        command: String,
        status: String,
        diagnostics: String,
    },

    #[error("Compiler reported success but produced no artifact at {0}")]
    MissingArtifact(PathBuf),

    // Load errors
    #[error("Failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    // Storage errors
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create cache directory {path}: {source}")]
    CacheDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No cache directory could be determined. Set KILN_CACHE_DIR or pass --output-dir")]
    NoCacheDir,

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a load error
    pub fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid option error
    pub fn invalid_option(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Request was rejected before any build was attempted
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::ModuleMarkerCount { .. }
                | Self::ModuleMarkerMalformed { .. }
                | Self::NameWithModuleMarker(_)
                | Self::InvalidName { .. }
                | Self::DependencyRead { .. }
                | Self::InvalidOption { .. }
        )
    }

    /// The external toolchain failed to produce an artifact
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Self::Build { .. }
                | Self::ToolchainNotFound { .. }
                | Self::ToolchainVersion { .. }
                | Self::MissingArtifact(_)
        )
    }

    /// The artifact exists but could not be loaded
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::Load { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ToolchainNotFound { .. } => {
                Some("Install a C compiler or point CC / CXX at one")
            }
            Self::ModuleMarkerCount { .. } => {
                Some("Module builds need exactly one KILN_MODULE(name, entry) line")
            }
            Self::NameWithModuleMarker(_) => Some("Drop --name when building with --module"),
            Self::NoCacheDir => Some("Run: export KILN_CACHE_DIR=/path/to/cache"),
            _ => None,
        }
    }
}
