pub mod core;
pub mod error;
pub mod import;
pub mod manager;
pub mod models;
pub mod resume;
pub mod storage;
pub mod store;

pub use error::{FetchError, Result};
pub use manager::DownloadManager;
pub use models::{FileStatus, ImportMode, ResumeStatus, Task, TaskEvent, TaskStatus};
