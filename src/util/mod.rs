//! Utility functions shared by the parser and the feed client.
//!
//! - **URL validation**: scheme checks and an optional SSRF guard for feed URLs
//! - **Text processing**: control-character stripping and title cleanup

mod text;
mod url_validator;

pub use text::{clean_title, collapse_whitespace, strip_control_chars};
pub use url_validator::{validate_url, HostPolicy, UrlValidationError};
