//! The safe-workdir sandbox applied to operator configuration before it is
//! handed to operator code. Any string that names an existing file or
//! directory on this host is rewritten into the configured safe directory;
//! strings that don't resolve pass through untouched.

use crate::errors::*;

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Walks a JSON document and rewrites every path-like string value in
/// place. Fails if the safe workdir itself doesn't exist as a directory.
pub fn sandbox_document(document: &mut Value, safe_workdir: &str) -> Result<()> {
    if !Path::new(safe_workdir).is_dir() {
        return Err(error::validation(format!(
            "safe workdir {} is not a directory",
            safe_workdir
        )));
    }
    let safe_abs = fs::canonicalize(safe_workdir)
        .chain_err(|| format!("Error resolving safe workdir {}", safe_workdir))?;
    traverse(document, &safe_abs);
    Ok(())
}

//
// Private functions
//

fn traverse(value: &mut Value, safe_abs: &PathBuf) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                traverse(child, safe_abs);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                match item {
                    Value::Object(_) => traverse(item, safe_abs),
                    other => sandbox_scalar(other, safe_abs),
                }
            }
        }
        other => sandbox_scalar(other, safe_abs),
    }
}

fn sandbox_scalar(value: &mut Value, safe_abs: &PathBuf) {
    if let Value::String(s) = value {
        if let Some(rewritten) = sandboxed_pathlike(s, safe_abs) {
            *value = Value::String(rewritten);
        }
    }
}

/// An existing directory maps to the safe workdir itself; an existing file
/// keeps only its basename under the safe workdir. Returns `None` when the
/// string doesn't name anything on this host.
fn sandboxed_pathlike(candidate: &str, safe_abs: &Path) -> Option<String> {
    let path = Path::new(candidate);
    if path.is_dir() {
        return Some(safe_abs.to_string_lossy().into_owned());
    }
    if path.is_file() {
        let basename = path.file_name()?;
        return Some(safe_abs.join(basename).to_string_lossy().into_owned());
    }
    None
}

//
// Tests
//
