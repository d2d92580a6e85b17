pub mod metadata;
pub mod url_parser;

pub use metadata::{MediaMetadata, parse_metadata};
pub use url_parser::extract_urls;
