//! Build command - get-or-build sources and report their artifacts

use crate::build::{BuildCoordinator, BuildRequest, LoadedModule};
use crate::cli::args::{BuildArgs, OutputFormat, RequestArgs};
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinSet;
use tracing::debug;

/// One built source, as reported by `--format json`
#[derive(Debug, Serialize)]
struct BuildReport {
    source: PathBuf,
    name: String,
    key: String,
    path: PathBuf,
}

impl BuildReport {
    fn new(source: PathBuf, module: &LoadedModule) -> Self {
        Self {
            source,
            name: module.name().to_string(),
            key: module.key().to_string(),
            path: module.path().to_path_buf(),
        }
    }
}

/// Read `source` and turn it into a request described by `args`
///
/// The source's directory is searched for headers, so includes relative to
/// the file keep working.
pub(crate) async fn load_request(
    source: &Path,
    args: &RequestArgs,
    config: &Config,
) -> KilnResult<BuildRequest> {
    let text = fs::read_to_string(source)
        .await
        .map_err(|e| KilnError::io(format!("reading {}", source.display()), e))?;

    let mut args = args.clone();
    // absolute, so `add.c` and `./add.c` hash the same
    let source = std::path::absolute(source)
        .map_err(|e| KilnError::io(format!("resolving {}", source.display()), e))?;
    if let Some(parent) = source.parent() {
        args.include_dirs.insert(0, parent.to_path_buf());
    }
    Ok(args.request(text, config.build.language))
}

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> KilnResult<()> {
    let coordinator = Arc::new(BuildCoordinator::from_config(config));

    let mut tasks = JoinSet::new();
    for (index, source) in args.sources.iter().enumerate() {
        let request = load_request(source, &args.request, config).await?;
        let coordinator = Arc::clone(&coordinator);
        let source = source.clone();
        tasks.spawn_blocking(move || {
            debug!("Building {}", source.display());
            let result = coordinator.compile(&request);
            (index, source, result)
        });
    }

    let mut results = Vec::with_capacity(args.sources.len());
    while let Some(joined) = tasks.join_next().await {
        let done = joined.map_err(|e| KilnError::Internal(format!("build task failed: {}", e)))?;
        results.push(done);
    }
    results.sort_by_key(|(index, _, _)| *index);

    let ctx = UiContext::detect();
    let mut reports = Vec::new();
    let mut first_error = None;
    for (_, source, result) in results {
        match result {
            Ok(module) => reports.push(BuildReport::new(source, &module)),
            Err(e) => {
                ui::step_error(&ctx, &format!("{}: {}", source.display(), e));
                first_error.get_or_insert(e);
            }
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text if !args.request.quiet => {
            for report in &reports {
                ui::step_ok_detail(&ctx, &report.name, &report.path.display().to_string());
            }
        }
        OutputFormat::Text => {}
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::request::Language;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_request_reads_source_and_adds_its_directory() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("add.c");
        std::fs::write(&source, "int add(int a, int b) { return a + b; }").unwrap();

        let mut config = Config::default();
        config.build.language = Some(Language::Cxx);

        let request = load_request(&source, &RequestArgs::default(), &config)
            .await
            .unwrap();
        assert!(request.source.contains("return a + b"));

        let options = request.effective_options();
        assert_eq!(options.include_dirs, vec![dir.path().to_path_buf()]);
        assert_eq!(options.language, Some(Language::Cxx));
    }

    #[tokio::test]
    async fn relative_spellings_of_one_source_agree() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let source = dir.path().join("sub").join("add.c");
        std::fs::write(&source, "int add(int a, int b) { return a + b; }").unwrap();

        let config = Config::default();
        let args = RequestArgs::default();
        let plain = load_request(&source, &args, &config).await.unwrap();
        let dotted = load_request(&dir.path().join("sub").join(".").join("add.c"), &args, &config)
            .await
            .unwrap();

        // compare the hashed form; Path equality already ignores `.`
        assert_eq!(
            serde_json::to_string(&plain.effective_options()).unwrap(),
            serde_json::to_string(&dotted.effective_options()).unwrap()
        );
        assert!(plain.effective_options().include_dirs[0].is_absolute());
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let err = load_request(
            Path::new("/nonexistent/kiln/missing.c"),
            &RequestArgs::default(),
            &Config::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KilnError::Io { .. }));
    }
}
