//! Compiler toolchain driving
//!
//! The coordinator treats compilation as an opaque step behind the
//! `Toolchain` trait. `CcToolchain` runs a system C/C++ compiler to turn one
//! source file into a shared library, in either GNU style (`cc`, `gcc`,
//! `clang`, `c++`) or MSVC style (`cl`).

use crate::build::request::{BuildOptions, Language};
use crate::error::{KilnError, KilnResult};
use serde_json::Value;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Everything a toolchain needs for one build
#[derive(Debug)]
pub struct BuildJob<'a> {
    /// Registration name of the module (artifact file stem)
    pub module_name: &'a str,
    /// Source text exactly as it should be compiled
    pub source: &'a str,
    /// Build options of the request
    pub options: &'a BuildOptions,
    /// Scratch directory for sources and intermediates
    pub work_dir: &'a Path,
    /// Where the shared library must be written
    pub output: &'a Path,
    /// Demote narration to debug level
    pub quiet: bool,
}

/// External build collaborator
pub trait Toolchain: Send + Sync {
    /// Version string identifying the compiler used for `language`
    fn version(&self, language: Language) -> KilnResult<String>;

    /// Compile and link `job.source` into `job.output`
    fn build(&self, job: &BuildJob<'_>) -> KilnResult<()>;
}

/// Compiler command-line dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// gcc / clang style flags
    Gnu,
    /// cl.exe style flags
    Msvc,
}

impl Flavor {
    /// Detect the dialect from the compiler program name
    pub fn detect(compiler: &str) -> Self {
        let program = Path::new(compiler)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(compiler)
            .to_ascii_lowercase();
        if program == "cl" || program == "clang-cl" {
            Self::Msvc
        } else {
            Self::Gnu
        }
    }
}

/// Option keys understood in `BuildOptions::extra`
const KNOWN_EXTRA: &[&str] = &[
    "define_macros",
    "undef_macros",
    "libraries",
    "runtime_library_dirs",
];

/// Toolchain backed by a system C/C++ compiler
#[derive(Debug)]
pub struct CcToolchain {
    c_compiler: String,
    cxx_compiler: String,
    versions: Mutex<HashMap<String, String>>,
}

impl CcToolchain {
    /// Toolchain using explicit compiler programs for C and C++
    pub fn new(c_compiler: impl Into<String>, cxx_compiler: impl Into<String>) -> Self {
        Self {
            c_compiler: c_compiler.into(),
            cxx_compiler: cxx_compiler.into(),
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve compilers: `CC` / `CXX` env vars, then the given fallbacks, then platform defaults
    pub fn from_env(c_fallback: Option<&str>, cxx_fallback: Option<&str>) -> Self {
        let default_c = if cfg!(target_env = "msvc") { "cl" } else { "cc" };
        let default_cxx = if cfg!(target_env = "msvc") { "cl" } else { "c++" };

        let pick = |var: &str, fallback: Option<&str>, default: &str| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| fallback.map(str::to_string))
                .unwrap_or_else(|| default.to_string())
        };

        Self::new(
            pick("CC", c_fallback, default_c),
            pick("CXX", cxx_fallback, default_cxx),
        )
    }

    /// Compiler program used for `language`
    pub fn compiler(&self, language: Language) -> &str {
        match language {
            Language::Cxx => &self.cxx_compiler,
            Language::C | Language::ObjC => &self.c_compiler,
        }
    }

    fn query_version(compiler: &str) -> KilnResult<String> {
        let flavor = Flavor::detect(compiler);
        let mut cmd = Command::new(compiler);
        if flavor == Flavor::Gnu {
            cmd.arg("--version");
        }

        let output = cmd.output().map_err(|e| KilnError::ToolchainNotFound {
            compiler: compiler.to_string(),
            source: e,
        })?;

        // cl prints its banner on stderr and exits non-zero without inputs
        let text = match flavor {
            Flavor::Gnu if !output.status.success() => {
                return Err(KilnError::ToolchainVersion {
                    compiler: compiler.to_string(),
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Flavor::Gnu => String::from_utf8_lossy(&output.stdout).to_string(),
            Flavor::Msvc => String::from_utf8_lossy(&output.stderr).to_string(),
        };

        let version = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| KilnError::ToolchainVersion {
                compiler: compiler.to_string(),
                reason: "empty version output".to_string(),
            })?;
        Ok(version)
    }

    /// Assemble the compiler command for a job
    pub fn command(&self, job: &BuildJob<'_>, source_path: &Path) -> KilnResult<Command> {
        let language = job.options.language();
        let compiler = self.compiler(language);
        let extra = ExtraOptions::parse(job.options)?;
        let mut cmd = Command::new(compiler);

        match Flavor::detect(compiler) {
            Flavor::Gnu => {
                cmd.arg("-shared");
                if !cfg!(windows) {
                    cmd.arg("-fPIC");
                }
                cmd.arg("-O2");
                if language == Language::ObjC {
                    cmd.args(["-x", "objective-c"]);
                }
                for dir in &job.options.include_dirs {
                    cmd.arg(prefixed("-I", dir.as_os_str()));
                }
                for (name, value) in &extra.define_macros {
                    cmd.arg(define_flag("-D", name, value.as_deref()));
                }
                for name in &extra.undef_macros {
                    cmd.arg(format!("-U{}", name));
                }
                cmd.args(&job.options.extra_compile_args);
                cmd.arg(source_path);
                cmd.arg("-o").arg(job.output);
                for dir in &job.options.library_dirs {
                    cmd.arg(prefixed("-L", dir.as_os_str()));
                }
                for dir in &extra.runtime_library_dirs {
                    cmd.arg(format!("-Wl,-rpath,{}", dir));
                }
                for lib in &extra.libraries {
                    cmd.arg(format!("-l{}", lib));
                }
                cmd.args(&job.options.extra_link_args);
            }
            Flavor::Msvc => {
                cmd.args(["/nologo", "/LD", "/O2"]);
                if language == Language::Cxx {
                    cmd.arg("/EHsc");
                }
                for dir in &job.options.include_dirs {
                    cmd.arg(prefixed("/I", dir.as_os_str()));
                }
                for (name, value) in &extra.define_macros {
                    cmd.arg(define_flag("/D", name, value.as_deref()));
                }
                for name in &extra.undef_macros {
                    cmd.arg(format!("/U{}", name));
                }
                cmd.args(&job.options.extra_compile_args);
                cmd.arg(source_path);
                cmd.arg(prefixed("/Fe", job.output.as_os_str()));
                let mut obj_dir = job.work_dir.as_os_str().to_os_string();
                obj_dir.push(std::path::MAIN_SEPARATOR_STR);
                cmd.arg(prefixed("/Fo", &obj_dir));
                cmd.arg("/link");
                for dir in &job.options.library_dirs {
                    cmd.arg(prefixed("/LIBPATH:", dir.as_os_str()));
                }
                for lib in &extra.libraries {
                    cmd.arg(format!("{}.lib", lib));
                }
                cmd.args(&job.options.extra_link_args);
            }
        }

        cmd.current_dir(job.work_dir);
        Ok(cmd)
    }
}

impl Toolchain for CcToolchain {
    fn version(&self, language: Language) -> KilnResult<String> {
        let compiler = self.compiler(language).to_string();
        let mut versions = self
            .versions
            .lock()
            .map_err(|_| KilnError::Internal("toolchain version cache poisoned".to_string()))?;

        if let Some(version) = versions.get(&compiler) {
            return Ok(version.clone());
        }

        let version = Self::query_version(&compiler)?;
        debug!("Compiler {} is {}", compiler, version);
        versions.insert(compiler, version.clone());
        Ok(version)
    }

    fn build(&self, job: &BuildJob<'_>) -> KilnResult<()> {
        let language = job.options.language();
        let source_path = job
            .work_dir
            .join(format!("{}.{}", job.module_name, language.source_extension()));
        fs::write(&source_path, job.source)
            .map_err(|e| KilnError::io(format!("writing {}", source_path.display()), e))?;

        let mut cmd = self.command(job, &source_path)?;
        let command_line = render(&cmd);
        debug!("Running {}", command_line);

        let output = cmd.output().map_err(|e| KilnError::ToolchainNotFound {
            compiler: self.compiler(language).to_string(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(KilnError::Build {
                module: job.module_name.to_string(),
                command: command_line,
                status: match output.status.code() {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                },
                diagnostics: diagnostics(&output),
            });
        }

        let warnings = diagnostics(&output);
        if !warnings.is_empty() {
            warn!("Compiler output for {}:\n{}", job.module_name, warnings);
        }
        if job.quiet {
            debug!("Compiled {}", job.module_name);
        } else {
            info!("Compiled {}", job.module_name);
        }
        Ok(())
    }
}

/// Parsed `BuildOptions::extra` entries
#[derive(Debug, Default, PartialEq)]
struct ExtraOptions {
    define_macros: Vec<(String, Option<String>)>,
    undef_macros: Vec<String>,
    libraries: Vec<String>,
    runtime_library_dirs: Vec<String>,
}

impl ExtraOptions {
    fn parse(options: &BuildOptions) -> KilnResult<Self> {
        let mut parsed = Self::default();

        for (key, value) in &options.extra {
            match key.as_str() {
                "define_macros" => parsed.define_macros = parse_macros(key, value)?,
                "undef_macros" => parsed.undef_macros = parse_strings(key, value)?,
                "libraries" => parsed.libraries = parse_strings(key, value)?,
                "runtime_library_dirs" => parsed.runtime_library_dirs = parse_strings(key, value)?,
                other => warn!(
                    "Ignoring unsupported build option '{}' (supported: {})",
                    other,
                    KNOWN_EXTRA.join(", ")
                ),
            }
        }

        Ok(parsed)
    }
}

fn parse_strings(key: &str, value: &Value) -> KilnResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| KilnError::invalid_option(key, "expected a list of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| KilnError::invalid_option(key, format!("expected a string, got {}", item)))
        })
        .collect()
}

fn macro_value(key: &str, value: &Value) -> KilnResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(if *b { "1" } else { "0" }.to_string())),
        other => Err(KilnError::invalid_option(key, format!("unsupported macro value {}", other))),
    }
}

/// Accepts `{"NAME": value}` or `[["NAME", value], ...]`
fn parse_macros(key: &str, value: &Value) -> KilnResult<Vec<(String, Option<String>)>> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(name, v)| Ok((name.clone(), macro_value(key, v)?)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.as_array().map(Vec::as_slice) {
                Some([Value::String(name), v]) => Ok((name.clone(), macro_value(key, v)?)),
                _ => Err(KilnError::invalid_option(
                    key,
                    format!("expected [name, value] pairs, got {}", item),
                )),
            })
            .collect(),
        _ => Err(KilnError::invalid_option(key, "expected an object or a list of pairs")),
    }
}

fn prefixed(flag: &str, value: &std::ffi::OsStr) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(value);
    arg
}

fn define_flag(flag: &str, name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("{}{}={}", flag, name, value),
        None => format!("{}{}", flag, name),
    }
}

fn render(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn diagnostics(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
