//! Batch download command.

use std::path::PathBuf;

use batchfetch::DownloaderConfig;

use crate::error::CliError;
use crate::manifest;
use crate::runner::CliRunner;

/// Arguments for the batch command.
pub struct BatchArgs {
    pub manifest: PathBuf,
    pub id: String,
}

/// Download every unit listed in a manifest.
pub fn run(runner: &CliRunner, args: BatchArgs) -> Result<(), CliError> {
    runner.log_startup("batch");

    let units = manifest::load(&args.manifest)?;
    let total = units.len();

    println!("Batch '{}': {} units", args.id, total);
    println!("  {}", concurrency_summary(runner.config(), total));
    println!();

    let mut session = runner.session();
    session.downloader().batch_download_async(units, &args.id)?;
    let outcome = session.wait(|o| o.batch_complete)?;

    let failed = outcome
        .failed
        .iter()
        .map(|(id, _)| id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();

    println!();
    println!("{} of {} downloaded", total - failed, total);

    if failed > 0 {
        return Err(CliError::Failed { failed, total });
    }
    Ok(())
}

/// Group size bounds the files open at once; connections bound the transfers.
fn concurrency_summary(config: &DownloaderConfig, total: usize) -> String {
    let group = config.max_open_files.min(total.max(1));
    let connections = config.max_connections.min(group);
    format!(
        "groups of up to {} files, {} connections at a time",
        group, connections
    )
}
