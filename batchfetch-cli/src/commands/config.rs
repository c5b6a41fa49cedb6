//! Configuration commands.

use batchfetch::config::config_file_path;
use batchfetch::ConfigFile;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Clone, Copy)]
pub enum ConfigAction {
    Path,
    Show,
    Init,
}

pub fn run(action: ConfigAction) -> Result<(), CliError> {
    match action {
        ConfigAction::Path => run_path(),
        ConfigAction::Show => run_show(),
        ConfigAction::Init => run_init(),
    }
}

fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

fn run_show() -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    print!("{}", render(&config));
    Ok(())
}

fn run_init() -> Result<(), CliError> {
    let path = config_file_path();
    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }
    ConfigFile::default().save()?;
    println!("Created {}", path.display());
    Ok(())
}

fn render(config: &ConfigFile) -> String {
    let open_files = config
        .downloader
        .max_open_files
        .map(|n| n.to_string())
        .unwrap_or_else(|| "auto".to_string());
    let log_dir = config
        .logging
        .directory
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string());

    let mut out = String::new();
    out.push_str("[downloader]\n");
    out.push_str(&format!("  connection_timeout = {}\n", config.downloader.connection_timeout));
    out.push_str(&format!("  max_open_files = {}\n", open_files));
    out.push_str("\n[engine]\n");
    out.push_str(&format!("  transfer_timeout = {}\n", config.engine.transfer_timeout));
    out.push_str(&format!("  max_connections = {}\n", config.engine.max_connections));
    out.push_str("\n[logging]\n");
    out.push_str(&format!("  level = {}\n", config.logging.level));
    out.push_str(&format!("  directory = {}\n", log_dir));
    out
}
