//! Cache key derivation
//!
//! A key is the SHA-256 of everything that can change the compiled output:
//! the source text, each dependency file's contents (in declaration order),
//! the build options, and the identity of the toolchain and runtime doing
//! the build. Same inputs produce the same key across processes and machines.

use crate::build::request::{BuildRequest, Language};
use crate::error::{KilnError, KilnResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Number of hex characters kept from the digest
pub const KEY_LEN: usize = 32;

/// Opaque, fixed-length cache key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key as a hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a key previously produced by `as_str`
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_LEN
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the environment a build runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Compiler version string
    pub toolchain: String,
    /// Version of the code driving the build
    pub runtime: String,
    /// Path of the executable driving the build
    pub executable: String,
}

impl Identity {
    /// Identity of the current process with the given toolchain version
    pub fn current(toolchain: impl Into<String>) -> Self {
        let executable = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Self {
            toolchain: toolchain.into(),
            runtime: format!("kiln {}", env!("CARGO_PKG_VERSION")),
            executable,
        }
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    sources: Vec<String>,
    options: String,
    identity: &'a Identity,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of the request's options with keys sorted
fn hash_options(request: &BuildRequest) -> KilnResult<String> {
    let mut options = request.effective_options();
    // an explicit default language builds the same thing as none
    if options.language == Some(Language::default()) {
        options.language = None;
    }
    // Round-trip through Value so object keys come out sorted
    let value = serde_json::to_value(&options)?;
    let serialized = serde_json::to_string(&value)?;
    Ok(sha256_hex(serialized.as_bytes()))
}

/// Derive the cache key for a request
///
/// Fails only when a dependency file cannot be read.
pub fn derive(request: &BuildRequest, identity: &Identity) -> KilnResult<CacheKey> {
    let mut sources = Vec::with_capacity(request.dependencies.len() + 1);
    sources.push(sha256_hex(request.source.as_bytes()));

    for path in &request.dependencies {
        let contents = fs::read(path).map_err(|e| KilnError::DependencyRead {
            path: PathBuf::from(path),
            source: e,
        })?;
        sources.push(sha256_hex(&contents));
    }

    let material = KeyMaterial {
        sources,
        options: hash_options(request)?,
        identity,
    };
    let serialized = serde_json::to_string(&material)?;
    let digest = sha256_hex(serialized.as_bytes());

    let key = CacheKey(digest[..KEY_LEN].to_string());
    debug!(
        "Derived key {} from {} dependencies",
        key,
        request.dependencies.len()
    );
    Ok(key)
}
