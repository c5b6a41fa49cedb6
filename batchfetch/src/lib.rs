//! batchfetch - concurrent batch file downloader
//!
//! Fetches one or many remote resources over HTTP(S) into files or fixed
//! capacity memory buffers, with resume support. Progress, errors, and
//! completion are delivered on a single owning thread.
//!
//! ```ignore
//! use std::sync::Arc;
//! use batchfetch::{Downloader, DownloaderConfig, DownloadUnit, DownloadUnits, MainLoop};
//!
//! let mut main_loop = MainLoop::new();
//! let downloader = Downloader::http(Arc::new(main_loop.handle()), &DownloaderConfig::default());
//! downloader.set_success_handler(|url, path, id| println!("{id}: {url} -> {path}"));
//!
//! let units = DownloadUnits::try_from_units(vec![
//!     DownloadUnit::to_file("https://example.com/a.bin", "/tmp/a.bin", "a").with_resume(true),
//! ])?;
//! downloader.batch_download_async(units, "assets")?;
//! main_loop.run_for(std::time::Duration::from_secs(10));
//! ```

pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fs;
pub mod logging;

pub use config::{ConfigFile, DownloaderConfig};
pub use download::{DownloadUnit, DownloadUnits, Downloader, SharedBuffer};
pub use engine::{HttpEngine, TransferEngine};
pub use error::{DownloadError, DownloaderError, DownloaderResult, ErrorCode, ErrorReport};
pub use executor::{MainLoop, MainLoopHandle, OwningThread};
pub use fs::{FileSystem, LocalFileSystem};
