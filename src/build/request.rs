//! Build request types
//!
//! A `BuildRequest` is everything a caller hands over for one get-or-build
//! call. It is never mutated by the coordinator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Base name used for plain builds when the caller does not give one
pub const DEFAULT_BASE_NAME: &str = "_kiln_module";

/// Source language handed to the compiler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    /// C (`.c`)
    #[default]
    #[serde(rename = "c")]
    C,
    /// C++ (`.cpp`)
    #[serde(rename = "c++")]
    Cxx,
    /// Objective-C (`.m`)
    #[serde(rename = "objc")]
    ObjC,
}

impl Language {
    /// File extension used when the source text is written out for the compiler
    pub fn source_extension(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cxx => "cpp",
            Self::ObjC => "m",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::C => "c",
            Self::Cxx => "c++",
            Self::ObjC => "objc",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Self::C),
            "c++" | "cxx" | "cpp" => Ok(Self::Cxx),
            "objc" => Ok(Self::ObjC),
            other => Err(format!("unknown language '{}' (expected c, c++ or objc)", other)),
        }
    }
}

/// What kind of artifact the source describes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Source is compiled verbatim under a caller-chosen base name
    #[default]
    Plain,
    /// Source declares its own name with a single `KILN_MODULE(name, entry)` marker
    Module,
}

impl ArtifactKind {
    fn is_plain(&self) -> bool {
        matches!(self, Self::Plain)
    }
}

/// Compiler and linker options for one request
///
/// Empty fields are left out of the serialized form, so a default value
/// and an absent one hash the same.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Source language; `None` means C
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,

    /// Artifact kind
    #[serde(skip_serializing_if = "ArtifactKind::is_plain")]
    pub kind: ArtifactKind,

    /// Header search paths
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_dirs: Vec<PathBuf>,

    /// Library search paths used at link time
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub library_dirs: Vec<PathBuf>,

    /// Extra arguments passed to the compiler
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_compile_args: Vec<String>,

    /// Extra arguments passed to the linker
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_link_args: Vec<String>,

    /// Toolchain-specific options forwarded as-is
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BuildOptions {
    /// Effective language
    pub fn language(&self) -> Language {
        self.language.unwrap_or_default()
    }
}

/// A single get-or-build request
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Source text, hashed and compiled verbatim
    pub source: String,

    /// Files the source depends on; their contents feed the cache key in this order
    pub dependencies: Vec<PathBuf>,

    /// Build options; `None` behaves exactly like `Some(BuildOptions::default())`
    pub options: Option<BuildOptions>,

    /// Base name of the artifact file (plain builds only)
    pub name: Option<String>,

    /// Rebuild even if the artifact is cached or already loaded
    pub force_rebuild: bool,

    /// Demote progress narration to debug level
    pub quiet: bool,

    /// Storage root override for this call
    pub output_dir: Option<PathBuf>,
}

impl BuildRequest {
    /// Create a request for the given source text
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Add a dependency file
    pub fn dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(path.into());
        self
    }

    /// Set the build options
    pub fn options(mut self, options: BuildOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set the artifact base name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Force a rebuild
    pub fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Suppress progress narration
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Store the artifact under this directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Options in effect for this request
    pub fn effective_options(&self) -> BuildOptions {
        self.options.clone().unwrap_or_default()
    }
}
