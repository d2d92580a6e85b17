pub mod common;
pub mod config;
pub mod downloader;
pub mod engine;
pub mod parser;

pub use config::Settings;
pub use downloader::{DownloadManager, FetchError, Result};
