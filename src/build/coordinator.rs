//! Get-or-build orchestration
//!
//! ```text
//! REGISTRY_CHECK -> LOCK_ACQUIRE -> STORE_CHECK -> { SKIP | BUILD -> STORE_FINALIZE }
//!                -> (lock release) -> LOAD -> REGISTRY_INSERT -> DONE
//! ```
//!
//! Any step can fail, which aborts the call. The lock guard is dropped on
//! every path out of the locked section, and a failed build never publishes
//! an artifact, so the next call simply tries again.

use crate::build::loader::{DylibLoader, LoadTarget, LoadedModule, Loader};
use crate::build::request::{ArtifactKind, BuildOptions, BuildRequest, DEFAULT_BASE_NAME};
use crate::build::toolchain::{BuildJob, CcToolchain, Toolchain};
use crate::cache::key::{self, CacheKey, Identity};
use crate::cache::lock::{self, ExclusiveLock, FileLock};
use crate::cache::marker::{self, ModuleMarker};
use crate::cache::registry::ProcessRegistry;
use crate::cache::store::{ArtifactPaths, ArtifactStore};
use crate::config::{self, Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Progress narration, demoted to debug level in quiet mode
macro_rules! narrate {
    ($quiet:expr, $($arg:tt)+) => {
        if $quiet {
            debug!($($arg)+);
        } else {
            info!($($arg)+);
        }
    };
}

/// Everything known about a request before any lock is taken
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Cache key
    pub key: CacheKey,
    /// Registration name, `{base}_{key}`
    pub module_name: String,
    /// Store the artifact lives in
    pub store: ArtifactStore,
    /// Artifact and lock paths
    pub paths: ArtifactPaths,
    options: BuildOptions,
    marker: Option<ModuleMarker>,
}

/// What happened inside the locked section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreOutcome {
    Reused,
    Built,
}

/// Orchestrates key derivation, locking, building, and loading
pub struct BuildCoordinator<T = CcToolchain, L = DylibLoader, X = FileLock>
where
    L: Loader,
{
    toolchain: T,
    loader: L,
    lock: X,
    registry: ProcessRegistry<L::Module>,
    cache_dir: Option<PathBuf>,
    force_rebuild: bool,
}

impl BuildCoordinator {
    /// Coordinator using the system compiler, configured from `config` and the environment
    pub fn from_config(config: &Config) -> Self {
        let toolchain =
            CcToolchain::from_env(config.build.cc.as_deref(), config.build.cxx.as_deref());
        Self::new(toolchain, DylibLoader, FileLock)
            .with_cache_dir(config::resolve_cache_dir(config))
            .with_force_rebuild(config::force_rebuild(config))
    }
}

impl<T, L, X> BuildCoordinator<T, L, X>
where
    T: Toolchain,
    L: Loader,
    X: ExclusiveLock,
{
    /// Coordinator with explicit collaborators and no default cache directory
    pub fn new(toolchain: T, loader: L, lock: X) -> Self {
        Self {
            toolchain,
            loader,
            lock,
            registry: ProcessRegistry::new(),
            cache_dir: None,
            force_rebuild: false,
        }
    }

    /// Storage root used when a request has no `output_dir`
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    /// Force every request to rebuild
    pub fn with_force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Default storage root
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Modules loaded by this coordinator
    pub fn registry(&self) -> &ProcessRegistry<L::Module> {
        &self.registry
    }

    /// Toolchain used for builds
    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Cache key of a request
    pub fn derive_key(&self, request: &BuildRequest) -> KilnResult<CacheKey> {
        let language = request.effective_options().language();
        let identity = Identity::current(self.toolchain.version(language)?);
        key::derive(request, &identity)
    }

    /// Resolve key, names, and paths without touching the store
    pub fn plan(&self, request: &BuildRequest) -> KilnResult<BuildPlan> {
        let options = request.effective_options();

        let marker = match options.kind {
            ArtifactKind::Module => {
                if let Some(name) = &request.name {
                    return Err(KilnError::NameWithModuleMarker(name.clone()));
                }
                Some(marker::find(&request.source)?)
            }
            ArtifactKind::Plain => None,
        };

        let base = match (&marker, &request.name) {
            (Some(marker), _) => marker.name.clone(),
            (None, Some(name)) => {
                validate_name(name)?;
                name.clone()
            }
            (None, None) => DEFAULT_BASE_NAME.to_string(),
        };

        let key = self.derive_key(request)?;
        let root = request
            .output_dir
            .clone()
            .or_else(|| self.cache_dir.clone())
            .ok_or(KilnError::NoCacheDir)?;
        // the compiler runs in a staging directory and the loader searches bare names
        let root = std::path::absolute(&root)
            .map_err(|e| KilnError::io(format!("resolving {}", root.display()), e))?;
        let store = ArtifactStore::new(root);
        let paths = store.locate(&base, &key);

        Ok(BuildPlan {
            module_name: ArtifactStore::stem(&base, &key),
            key,
            store,
            paths,
            options,
            marker,
        })
    }

    /// Return the loaded module for `request`, building it if needed
    pub fn compile(&self, request: &BuildRequest) -> KilnResult<Arc<L::Module>> {
        let force = request.force_rebuild || self.force_rebuild;
        let plan = self.plan(request)?;

        if !force {
            if let Some(module) = self.registry.get(&plan.module_name) {
                debug!("Registry hit for {}", plan.module_name);
                return Ok(module);
            }
        }

        self.registry
            .get_or_insert_with(&plan.module_name, force, |replaces_loaded| {
                self.build_and_load(request, &plan, force, replaces_loaded)
            })
    }

    fn build_and_load(
        &self,
        request: &BuildRequest,
        plan: &BuildPlan,
        force: bool,
        replaces_loaded: bool,
    ) -> KilnResult<L::Module> {
        plan.store.ensure_root()?;

        let outcome = lock::with_lock(&self.lock, &plan.paths.lock, || {
            if !force && ArtifactStore::exists(&plan.paths.artifact) {
                narrate!(
                    request.quiet,
                    "Reusing already compiled module from {}",
                    plan.paths.artifact.display()
                );
                return Ok(StoreOutcome::Reused);
            }

            narrate!(
                request.quiet,
                "Compiling {} into {}",
                plan.module_name,
                plan.paths.artifact.display()
            );
            let source = match &plan.marker {
                Some(marker) => marker::inject(&request.source, marker, &plan.key),
                None => request.source.clone(),
            };

            plan.store.materialize(&plan.paths.artifact, |output, work_dir| {
                self.toolchain.build(&BuildJob {
                    module_name: &plan.module_name,
                    source: &source,
                    options: &plan.options,
                    work_dir,
                    output,
                    quiet: request.quiet,
                })
            })?;
            Ok(StoreOutcome::Built)
        })?;

        debug!("{} {:?}", plan.module_name, outcome);
        let module = self.loader.load(&LoadTarget {
            path: &plan.paths.artifact,
            key: &plan.key,
            module_name: &plan.module_name,
            kind: plan.options.kind,
            // another registry in this process may still map the old file
            private_copy: force || replaces_loaded,
        })?;

        if outcome == StoreOutcome::Built {
            narrate!(
                request.quiet,
                "Built module {} in {}",
                plan.module_name,
                plan.paths.artifact.display()
            );
        }
        Ok(module)
    }
}

fn validate_name(name: &str) -> KilnResult<()> {
    let invalid = |reason: &str| KilnError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("only letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}

static GLOBAL: OnceLock<BuildCoordinator> = OnceLock::new();

/// Process-wide coordinator
///
/// Created on first use from the config file and environment, then kept
/// for the rest of the process. A config file that fails to load is
/// reported and replaced by defaults.
pub fn global() -> &'static BuildCoordinator {
    GLOBAL.get_or_init(|| {
        let config = ConfigManager::new().load_blocking().unwrap_or_else(|e| {
            warn!("Ignoring configuration: {}", e);
            Config::default()
        });
        BuildCoordinator::from_config(&config)
    })
}

/// Get or build `request` with the process-wide coordinator
pub fn compile(request: &BuildRequest) -> KilnResult<Arc<LoadedModule>> {
    global().compile(request)
}
