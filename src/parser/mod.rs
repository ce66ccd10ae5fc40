// Parser module
// YAML definition parsing, typed models, and semantic validation

pub mod error;
pub mod models;
pub mod validate;

pub use error::{ParseError, ParseResult};
pub use models::*;
pub use validate::PipelineValidator;

use std::path::Path;

/// Parse a pipeline definition from YAML text.
pub fn parse_str(content: &str) -> ParseResult<Pipeline> {
    serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))
}

/// Parse a pipeline definition from a file.
pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Pipeline> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ParseError::io(format!("failed to read {}: {}", path.display(), e)))?;
    parse_str(&content)
}
