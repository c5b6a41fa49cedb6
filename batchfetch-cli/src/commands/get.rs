//! Single download command.

use std::path::PathBuf;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the get command.
pub struct GetArgs {
    pub url: String,
    pub dest: PathBuf,
    pub id: Option<String>,
}

/// Download one URL to a file.
pub fn run(runner: &CliRunner, args: GetArgs) -> Result<(), CliError> {
    runner.log_startup("get");

    let id = args.id.clone().unwrap_or_else(|| default_id(&args));
    let mut session = runner.session();

    println!("Downloading {}", args.url);
    println!("  to {}", args.dest.display());
    println!();

    session.downloader().download_async(&args.url, &args.dest, &id)?;
    let outcome = session.wait(|o| o.settled() > 0)?;

    println!();
    if outcome.failed.is_empty() {
        println!("Done.");
        Ok(())
    } else {
        Err(CliError::Failed { failed: 1, total: 1 })
    }
}

fn default_id(args: &GetArgs) -> String {
    args.dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.url.clone())
}
