//! Dynamic loading of built artifacts
//!
//! The coordinator never looks inside a loaded module; it only asks a
//! `Loader` for one. `DylibLoader` opens shared libraries with `libloading`.

use crate::build::request::ArtifactKind;
use crate::cache::key::CacheKey;
use crate::cache::marker::{CACHE_KEY_SYMBOL, MODULE_ENTRY_SYMBOL, MODULE_NAME_SYMBOL};
use crate::error::{KilnError, KilnResult};
use std::ffi::{c_char, CStr};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// What to load
#[derive(Debug, Clone)]
pub struct LoadTarget<'a> {
    /// Published artifact
    pub path: &'a Path,
    /// Cache key the artifact was built under
    pub key: &'a CacheKey,
    /// Registration name (artifact file stem)
    pub module_name: &'a str,
    /// Kind of artifact
    pub kind: ArtifactKind,
    /// Load from a private copy of the file; set when the artifact was
    /// rebuilt over a path the OS loader may already have mapped
    pub private_copy: bool,
}

/// External load collaborator
pub trait Loader: Send + Sync {
    /// Handle type produced by a successful load
    type Module: Send + Sync;

    /// Load the artifact described by `target`
    fn load(&self, target: &LoadTarget<'_>) -> KilnResult<Self::Module>;
}

/// A shared library loaded into this process
pub struct LoadedModule {
    // dropped before `_private_copy` so the library is closed before its file goes away
    library: libloading::Library,
    path: PathBuf,
    key: CacheKey,
    name: String,
    _private_copy: Option<TempDir>,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("path", &self.path)
            .finish()
    }
}

impl LoadedModule {
    /// Path of the published artifact
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache key of the artifact
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Registration name of the module
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a symbol
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's real type; see `libloading::Library::get`.
    pub unsafe fn get<T>(&self, symbol: &str) -> KilnResult<libloading::Symbol<'_, T>> {
        self.library
            .get::<T>(symbol.as_bytes())
            .map_err(|e| KilnError::load(&self.path, format!("symbol '{}' not found: {}", symbol, e)))
    }

    fn read_c_string(&self, symbol: &str) -> Option<String> {
        // SAFETY: the prelude defines these symbols as NUL-terminated char arrays
        unsafe {
            let ptr = self.get::<*const c_char>(symbol).ok()?;
            let ptr: *const c_char = *ptr;
            if ptr.is_null() {
                return None;
            }
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }

    /// Cache key compiled into a module build
    pub fn embedded_key(&self) -> Option<String> {
        self.read_c_string(CACHE_KEY_SYMBOL)
    }

    /// Registration name compiled into a module build
    pub fn embedded_name(&self) -> Option<String> {
        self.read_c_string(MODULE_NAME_SYMBOL)
    }

    /// Entry symbol declared by a module build's marker
    pub fn entry_symbol(&self) -> Option<String> {
        self.read_c_string(MODULE_ENTRY_SYMBOL)
    }
}

/// Loader for platform shared libraries
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl DylibLoader {
    /// Copy the artifact somewhere private so the OS loader cannot hand back
    /// the mapping of the file it replaced
    fn private_copy(path: &Path) -> KilnResult<(TempDir, PathBuf)> {
        let dir = tempfile::Builder::new()
            .prefix("kiln-load-")
            .tempdir()
            .map_err(|e| KilnError::io("creating private load directory", e))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| KilnError::load(path, "artifact path has no file name"))?;
        let copy = dir.path().join(file_name);
        fs::copy(path, &copy)
            .map_err(|e| KilnError::io(format!("copying {} for reload", path.display()), e))?;
        Ok((dir, copy))
    }
}

impl Loader for DylibLoader {
    type Module = LoadedModule;

    fn load(&self, target: &LoadTarget<'_>) -> KilnResult<LoadedModule> {
        if !target.path.is_file() {
            return Err(KilnError::load(target.path, "artifact file not found"));
        }

        let (private_copy, load_path) = if target.private_copy {
            let (dir, copy) = Self::private_copy(target.path)?;
            (Some(dir), copy)
        } else {
            (None, target.path.to_path_buf())
        };

        debug!("Loading {}", load_path.display());
        // SAFETY: loading runs the library's initializers; the artifact was
        // produced by our own toolchain from the caller's source.
        let library = unsafe { libloading::Library::new(&load_path) }
            .map_err(|e| KilnError::load(target.path, e.to_string()))?;

        let module = LoadedModule {
            library,
            path: target.path.to_path_buf(),
            key: target.key.clone(),
            name: target.module_name.to_string(),
            _private_copy: private_copy,
        };

        if target.kind == ArtifactKind::Module {
            match module.embedded_name() {
                Some(name) if name == target.module_name => {}
                Some(name) => {
                    return Err(KilnError::load(
                        target.path,
                        format!(
                            "module registers itself as '{}' but was built as '{}'",
                            name, target.module_name
                        ),
                    ))
                }
                None => {
                    return Err(KilnError::load(
                        target.path,
                        format!("missing exported symbol '{}'", MODULE_NAME_SYMBOL),
                    ))
                }
            }
        }

        Ok(module)
    }
}
