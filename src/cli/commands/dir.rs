//! Dir command - print the cache directory

use crate::config::{self, Config};
use crate::error::{KilnError, KilnResult};

/// Execute the dir command
pub async fn execute(config: &Config) -> KilnResult<()> {
    let dir = config::resolve_cache_dir(config).ok_or(KilnError::NoCacheDir)?;
    println!("{}", dir.display());
    Ok(())
}
