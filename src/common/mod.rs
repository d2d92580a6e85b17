pub mod desktop;
pub mod fs;
pub mod logger;
pub mod progress;
