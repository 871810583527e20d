pub mod headers;
pub mod security;

pub use headers::{content_disposition, guess_content_type};
pub use security::sanitize_filename;
