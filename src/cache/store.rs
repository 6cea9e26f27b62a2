//! Filesystem artifact store
//!
//! Layout under a cache root:
//!
//! | Path | Contents |
//! |------|----------|
//! | `{name}_{key}{suffix}` | Published artifact |
//! | `{name}_{key}.lock` | Empty advisory lock file |
//! | `.kiln-build-*` | Staging directory of a build in progress |
//!
//! Builds write into a staging directory inside the root and are published
//! with a single rename, so an artifact path either does not exist or holds
//! a complete artifact.

use crate::cache::key::{CacheKey, KEY_LEN};
use crate::error::{KilnError, KilnResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const STAGING_PREFIX: &str = ".kiln-build-";
const LOCK_SUFFIX: &str = "lock";

/// Paths of one artifact record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Published artifact file
    pub artifact: PathBuf,
    /// Sibling lock file
    pub lock: PathBuf,
}

/// A published artifact found under a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Base name part of the file name
    pub name: String,
    /// Key part of the file name
    pub key: CacheKey,
    /// Artifact path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Artifact store rooted at a writable directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    suffix: String,
}

impl ArtifactStore {
    /// Store for `root` using the platform's shared library suffix
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_suffix(root, std::env::consts::DLL_SUFFIX)
    }

    /// Store for `root` with an explicit artifact suffix (including the dot)
    pub fn with_suffix(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact file suffix
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Create the root directory if needed
    pub fn ensure_root(&self) -> KilnResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| KilnError::CacheDirCreate {
            path: self.root.clone(),
            source: e,
        })
    }

    /// File stem shared by an artifact and its lock
    pub fn stem(name: &str, key: &CacheKey) -> String {
        format!("{}_{}", name, key)
    }

    /// Paths of the artifact record for `name` and `key`
    pub fn locate(&self, name: &str, key: &CacheKey) -> ArtifactPaths {
        let stem = Self::stem(name, key);
        ArtifactPaths {
            artifact: self.root.join(format!("{}{}", stem, self.suffix)),
            lock: self.root.join(format!("{}.{}", stem, LOCK_SUFFIX)),
        }
    }

    /// Whether a published artifact exists at `path`
    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    /// Run `build` into a staging directory and publish its output at `artifact`
    ///
    /// `build` gets the staging output path and the staging directory to use
    /// for intermediate files. Nothing is published if it fails or does not
    /// produce the output. An existing artifact is replaced.
    pub fn materialize<F>(&self, artifact: &Path, build: F) -> KilnResult<()>
    where
        F: FnOnce(&Path, &Path) -> KilnResult<()>,
    {
        let file_name = artifact
            .file_name()
            .ok_or_else(|| KilnError::Internal(format!("artifact path has no file name: {}", artifact.display())))?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| KilnError::io(format!("creating staging directory in {}", self.root.display()), e))?;
        let output = staging.path().join(file_name);
        debug!("Staging {} in {}", artifact.display(), staging.path().display());

        build(&output, staging.path())?;

        if !output.is_file() {
            return Err(KilnError::MissingArtifact(output));
        }

        fs::rename(&output, artifact).map_err(|e| {
            KilnError::io(
                format!("publishing {} -> {}", output.display(), artifact.display()),
                e,
            )
        })?;
        debug!("Published {}", artifact.display());

        // staging directory and intermediates are removed when `staging` drops
        Ok(())
    }

    /// Published artifacts under the root, sorted by file name
    pub fn list(&self) -> KilnResult<Vec<StoredArtifact>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KilnError::io(format!("reading {}", self.root.display()), e)),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KilnError::io("reading cache entry", e))?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((name, key)) = self.parse_file_name(file_name) else {
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|e| KilnError::io(format!("reading metadata of {}", path.display()), e))?;
            if !metadata.is_file() {
                continue;
            }
            artifacts.push(StoredArtifact {
                name,
                key,
                path,
                size: metadata.len(),
            });
        }

        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(artifacts)
    }

    fn parse_file_name(&self, file_name: &str) -> Option<(String, CacheKey)> {
        if file_name.starts_with(STAGING_PREFIX) {
            return None;
        }
        let stem = file_name.strip_suffix(self.suffix.as_str())?;
        // name is at least one character, then '_' and the key
        if stem.len() < KEY_LEN + 2 {
            return None;
        }
        let split = stem.len() - KEY_LEN;
        // foreign names may put a multibyte character across the split
        let (name, key) = (stem.get(..split)?, stem.get(split..)?);
        let name = name.strip_suffix('_')?;
        Some((name.to_string(), CacheKey::parse(key)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> CacheKey {
        CacheKey::parse("00112233445566778899aabbccddeeff").unwrap()
    }

    #[test]
    fn locate_layout() {
        let store = ArtifactStore::with_suffix("/cache", ".so");
        let paths = store.locate("demo", &key());
        assert_eq!(
            paths.artifact,
            PathBuf::from("/cache/demo_00112233445566778899aabbccddeeff.so")
        );
        assert_eq!(
            paths.lock,
            PathBuf::from("/cache/demo_00112233445566778899aabbccddeeff.lock")
        );
    }

    #[test]
    fn materialize_publishes_output() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_suffix(dir.path(), ".so");
        let paths = store.locate("demo", &key());

        assert!(!ArtifactStore::exists(&paths.artifact));
        store
            .materialize(&paths.artifact, |output, work_dir| {
                assert!(output.starts_with(work_dir));
                assert_ne!(output, paths.artifact.as_path());
                fs::write(work_dir.join("demo.o"), b"object").unwrap();
                fs::write(output, b"artifact").unwrap();
                Ok(())
            })
            .unwrap();

        assert!(ArtifactStore::exists(&paths.artifact));
        assert_eq!(fs::read(&paths.artifact).unwrap(), b"artifact");

        // no staging directories left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_build_publishes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_suffix(dir.path(), ".so");
        let paths = store.locate("demo", &key());

        let err = store
            .materialize(&paths.artifact, |output, _| {
                fs::write(output, b"half written").unwrap();
                Err(KilnError::Internal("linker crashed".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, KilnError::Internal(_)));
        assert!(!ArtifactStore::exists(&paths.artifact));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn silent_build_without_output_is_error() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_suffix(dir.path(), ".so");
        let paths = store.locate("demo", &key());

        let err = store.materialize(&paths.artifact, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, KilnError::MissingArtifact(_)));
        assert!(!ArtifactStore::exists(&paths.artifact));
    }

    #[test]
    fn materialize_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_suffix(dir.path(), ".so");
        let paths = store.locate("demo", &key());

        store
            .materialize(&paths.artifact, |out, _| Ok(fs::write(out, b"v1").unwrap()))
            .unwrap();
        store
            .materialize(&paths.artifact, |out, _| Ok(fs::write(out, b"v2").unwrap()))
            .unwrap();

        assert_eq!(fs::read(&paths.artifact).unwrap(), b"v2");
    }

    #[test]
    fn list_skips_locks_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_suffix(dir.path(), ".so");
        let paths = store.locate("my_mod", &key());

        fs::write(&paths.artifact, b"1234").unwrap();
        fs::write(&paths.lock, b"").unwrap();
        fs::write(dir.path().join("notes.so"), b"").unwrap();
        fs::write(dir.path().join("x_0011.so"), b"").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "my_mod");
        assert_eq!(listed[0].key, key());
        assert_eq!(listed[0].size, 4);
    }

    #[test]
    fn list_skips_non_ascii_names() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_suffix(dir.path(), ".so");
        let paths = store.locate("ok", &key());
        fs::write(&paths.artifact, b"").unwrap();
        // 'é' straddles the byte offset where the key would start
        fs::write(dir.path().join(format!("aaé{}.so", "a".repeat(31))), b"").unwrap();
        fs::write(dir.path().join(format!("ü_{}.so", "é".repeat(16))), b"").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "ok");
    }

    #[test]
    fn list_missing_root_is_empty() {
        let store = ArtifactStore::new("/nonexistent/kiln/cache");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn ensure_root_creates_directories() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("a").join("b"));
        store.ensure_root().unwrap();
        assert!(store.root().is_dir());
    }
}
