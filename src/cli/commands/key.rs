//! Key command - print the cache key of a source

use crate::build::BuildCoordinator;
use crate::cli::args::KeyArgs;
use crate::cli::commands::build::load_request;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};

/// Execute the key command
pub async fn execute(args: KeyArgs, config: &Config) -> KilnResult<()> {
    let request = load_request(&args.source, &args.request, config).await?;
    let coordinator = BuildCoordinator::from_config(config);

    // querying the compiler version spawns a process
    let key = tokio::task::spawn_blocking(move || coordinator.derive_key(&request))
        .await
        .map_err(|e| KilnError::Internal(format!("key task failed: {}", e)))??;

    println!("{}", key);
    Ok(())
}
