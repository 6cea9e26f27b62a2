//! CLI argument definitions using clap derive

use crate::build::request::{ArtifactKind, BuildOptions, BuildRequest, Language};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kiln - compile once, load anywhere
///
/// Builds C/C++ sources into shared libraries kept in a content-addressed
/// cache, so identical inputs are compiled exactly once.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or reuse) and load one or more sources
    Build(BuildArgs),

    /// Print the cache key of a source without building it
    Key(KeyArgs),

    /// List artifacts in the cache
    List(ListArgs),

    /// Print the resolved cache directory
    Dir,

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Options shared by every command that describes a build
#[derive(Args, Debug, Clone, Default)]
pub struct RequestArgs {
    /// File whose content is part of the cache key (repeatable)
    #[arg(long = "dep", value_name = "PATH")]
    pub dependencies: Vec<PathBuf>,

    /// Header search path (repeatable)
    #[arg(short = 'I', long = "include-dir", value_name = "DIR")]
    pub include_dirs: Vec<PathBuf>,

    /// Library search path (repeatable)
    #[arg(short = 'L', long = "library-dir", value_name = "DIR")]
    pub library_dirs: Vec<PathBuf>,

    /// Source language (c, c++, objc); defaults to the config, then C
    #[arg(long = "lang", value_name = "LANG")]
    pub language: Option<Language>,

    /// Extra compiler argument (repeatable)
    #[arg(long = "cflag", value_name = "ARG", allow_hyphen_values = true)]
    pub cflags: Vec<String>,

    /// Extra linker argument (repeatable)
    #[arg(long = "ldflag", value_name = "ARG", allow_hyphen_values = true)]
    pub ldflags: Vec<String>,

    /// Preprocessor definition, NAME or NAME=VALUE (repeatable)
    #[arg(short = 'D', long = "define", value_name = "MACRO")]
    pub defines: Vec<String>,

    /// Library to link against (repeatable)
    #[arg(short = 'l', long = "lib", value_name = "NAME")]
    pub libraries: Vec<String>,

    /// Base name of the artifact
    #[arg(long, conflicts_with = "module")]
    pub name: Option<String>,

    /// Build a module whose name comes from its KILN_MODULE marker
    #[arg(long)]
    pub module: bool,

    /// Rebuild even if a cached artifact exists
    #[arg(long)]
    pub force: bool,

    /// Only report failures
    #[arg(short, long)]
    pub quiet: bool,

    /// Store artifacts here instead of the cache directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl RequestArgs {
    /// Options described by the flags, with `default_language` used when `--lang` is absent
    pub fn options(&self, default_language: Option<Language>) -> BuildOptions {
        let mut extra = BTreeMap::new();
        if !self.defines.is_empty() {
            let pairs = self
                .defines
                .iter()
                .map(|d| match d.split_once('=') {
                    Some((name, value)) => Value::from(vec![Value::from(name), Value::from(value)]),
                    None => Value::from(vec![Value::from(d.as_str()), Value::Null]),
                })
                .collect::<Vec<_>>();
            extra.insert("define_macros".to_string(), Value::from(pairs));
        }
        if !self.libraries.is_empty() {
            extra.insert("libraries".to_string(), Value::from(self.libraries.clone()));
        }

        BuildOptions {
            language: self.language.or(default_language),
            kind: if self.module {
                ArtifactKind::Module
            } else {
                ArtifactKind::Plain
            },
            include_dirs: self.include_dirs.clone(),
            library_dirs: self.library_dirs.clone(),
            extra_compile_args: self.cflags.clone(),
            extra_link_args: self.ldflags.clone(),
            extra,
        }
    }

    /// Request for `source` described by the flags
    pub fn request(&self, source: String, default_language: Option<Language>) -> BuildRequest {
        let mut request = BuildRequest::new(source)
            .options(self.options(default_language))
            .force_rebuild(self.force)
            .quiet(self.quiet);
        for dep in &self.dependencies {
            request = request.dependency(dep.clone());
        }
        if let Some(name) = &self.name {
            request = request.name(name.clone());
        }
        if let Some(dir) = &self.output_dir {
            request = request.output_dir(dir.clone());
        }
        request
    }
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Source files to build
    #[arg(required = true, value_name = "SOURCE")]
    pub sources: Vec<PathBuf>,

    #[command(flatten)]
    pub request: RequestArgs,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the key command
#[derive(Parser, Debug)]
pub struct KeyArgs {
    /// Source file
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    #[command(flatten)]
    pub request: RequestArgs,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Directory to list instead of the cache directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format options
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}
