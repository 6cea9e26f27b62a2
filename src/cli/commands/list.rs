//! List command - show cached artifacts

use crate::cache::{ArtifactStore, StoredArtifact};
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::{self, Config};
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct ArtifactEntry<'a> {
    name: &'a str,
    key: String,
    path: String,
    size: u64,
}

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> KilnResult<()> {
    let root = args
        .output_dir
        .or_else(|| config::resolve_cache_dir(config))
        .ok_or(KilnError::NoCacheDir)?;
    let store = ArtifactStore::new(root);
    let artifacts = store.list()?;

    match args.format {
        OutputFormat::Json => print_json(&artifacts)?,
        OutputFormat::Text => print_table(&store, &artifacts),
    }

    Ok(())
}

fn print_table(store: &ArtifactStore, artifacts: &[StoredArtifact]) {
    let ctx = UiContext::detect();
    if artifacts.is_empty() {
        ui::step_warn(&ctx, &format!("No artifacts in {}", store.root().display()));
        return;
    }

    ui::section(&ctx, "Artifacts");
    ui::key_value(&ctx, "Root", &store.root().display().to_string());
    ui::key_value(&ctx, "Count", &artifacts.len().to_string());
    println!();
    println!(
        "{:<32} {:<34} {:>10}",
        style("NAME").bold(),
        style("KEY").bold(),
        style("SIZE").bold()
    );
    println!("{}", "-".repeat(78));

    for artifact in artifacts {
        println!(
            "{:<32} {:<34} {:>10}",
            truncate(&artifact.name, 32),
            artifact.key,
            format_bytes(artifact.size)
        );
    }
}

fn print_json(artifacts: &[StoredArtifact]) -> KilnResult<()> {
    let entries: Vec<_> = artifacts
        .iter()
        .map(|a| ArtifactEntry {
            name: &a.name,
            key: a.key.to_string(),
            path: a.path.display().to_string(),
            size: a.size,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{}...", kept)
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
