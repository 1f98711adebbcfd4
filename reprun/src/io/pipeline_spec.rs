//! Pipeline specification loader.
//!
//! One step per line: `<script-path> <step-name>`, whitespace separated.
//! Script paths are relative to the specification file's own directory, not
//! the working directory. Blank lines and `#` comments are skipped.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::types::{Pipeline, Step};
use crate::io::stamp::RESERVED_NAMES;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecParseError {
    #[error("{file}:{line}: expected `<script-path> <step-name>`, found {found:?}")]
    Malformed {
        file: String,
        line: usize,
        found: String,
    },
    #[error("{file}:{line}: cannot find pipeline component script {script}")]
    MissingScript {
        file: String,
        line: usize,
        script: String,
    },
    #[error("{file}:{line}: step name '{name}' cannot be used as a directory name")]
    InvalidName {
        file: String,
        line: usize,
        name: String,
    },
    #[error("{file}:{line}: {reason}")]
    Duplicate {
        file: String,
        line: usize,
        reason: String,
    },
}

/// Load and validate a pipeline specification.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read pipeline specification {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let pipeline = parse_pipeline(&contents, &path.display().to_string(), base)?;
    debug!(steps = pipeline.len(), "pipeline loaded");
    Ok(pipeline)
}

/// Parse specification text; `base` is the directory scripts are relative to.
pub fn parse_pipeline(contents: &str, file: &str, base: &Path) -> Result<Pipeline, SpecParseError> {
    let mut steps: Vec<Step> = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let &[script, name] = tokens.as_slice() else {
            return Err(SpecParseError::Malformed {
                file: file.to_string(),
                line,
                found: trimmed.to_string(),
            });
        };
        if !is_valid_step_name(name) {
            return Err(SpecParseError::InvalidName {
                file: file.to_string(),
                line,
                name: name.to_string(),
            });
        }
        let script_path = fs::canonicalize(base.join(script)).map_err(|_| {
            SpecParseError::MissingScript {
                file: file.to_string(),
                line,
                script: base.join(script).display().to_string(),
            }
        })?;
        if steps.iter().any(|step| step.name == name) {
            return Err(SpecParseError::Duplicate {
                file: file.to_string(),
                line,
                reason: format!("duplicate step name '{name}'"),
            });
        }
        steps.push(Step::new(name, script_path));
    }
    // Names were checked for uniqueness above.
    Pipeline::new(steps).map_err(|reason| SpecParseError::Duplicate {
        file: file.to_string(),
        line: 0,
        reason,
    })
}

fn is_valid_step_name(name: &str) -> bool {
    !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
        && !RESERVED_NAMES.contains(&name)
}
