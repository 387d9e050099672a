//! Environment file parsing

use std::fs;
use std::io;

use confine_core::config::PathSpec;
use confine_core::{ConfineError, Result};
use log::debug;

/// Parse environment file content into `(name, value)` pairs.
///
/// Lines starting with `#` or `;` (after optional blanks) are comments.
/// Lines without `=` are skipped. Values are kept as written, quotes
/// included; only the surrounding blanks are trimmed.
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let Some((name, value)) = trimmed.split_once('=') else {
            debug!("Skipping line {} without '=': {:?}", lineno + 1, line);
            continue;
        };

        let name = name.trim();
        if name.is_empty() {
            debug!("Skipping line {} with empty name", lineno + 1);
            continue;
        }

        vars.push((name.to_string(), value.trim().to_string()));
    }

    vars
}

/// Read and parse one environment file.
///
/// Returns `Ok(None)` for a missing file marked optional.
pub fn load_env_file(spec: &PathSpec) -> Result<Option<Vec<(String, String)>>> {
    match fs::read_to_string(&spec.path) {
        Ok(content) => Ok(Some(parse_env_file(&content))),
        Err(e) if e.kind() == io::ErrorKind::NotFound && spec.ignore_missing => {
            debug!("Optional environment file {} missing", spec.path.display());
            Ok(None)
        }
        Err(source) => Err(ConfineError::EnvironmentFile {
            path: spec.path.clone(),
            source,
        }),
    }
}
