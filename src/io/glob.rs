//! Path expansion for file arguments.
//!
//! File arguments may contain environment variables (`$DATA`, `${DATA}`), a
//! leading `~`, and glob wildcards. They are expanded in that order, joined
//! onto an optional base path, and matched against the filesystem.
//!
//! # Examples
//!
//! ```no_run
//! use chunkwise::io::glob::expand_path;
//! use std::path::Path;
//!
//! // Every run file of one period
//! let files = expand_path("p03/run*.parquet", Some(Path::new("$DATA_DIR")), None)?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use anyhow::{Context, Result};
use glob::glob;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Expand a glob pattern into a sorted vector of matching file paths.
///
/// Only regular files are returned. No matches is an empty vector, not an
/// error.
///
/// # Errors
///
/// Returns an error if the pattern is invalid or a directory can't be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }

    // Sort for deterministic order
    result.sort();

    Ok(result)
}

/// Substitute `$NAME` and `${NAME}` references.
///
/// Names are looked up in `substitute` first, then in the environment.
/// Unknown names are left untouched.
#[must_use]
pub fn expand_vars(expr: &str, substitute: Option<&HashMap<String, String>>) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("static regex")
    });
    re.replace_all(expr, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        substitute
            .and_then(|s| s.get(name).cloned())
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

fn expand_user(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~')
        && (rest.is_empty() || rest.starts_with('/'))
        && let Ok(home) = std::env::var("HOME")
    {
        return format!("{home}{rest}");
    }
    path.to_string()
}

/// Expand variables, `~` and wildcards in `path`, relative to `base_path`.
///
/// # Errors
///
/// Returns an error if the expanded pattern is not a valid glob.
pub fn expand_path(
    path: &str,
    base_path: Option<&Path>,
    substitute: Option<&HashMap<String, String>>,
) -> Result<Vec<PathBuf>> {
    let path = expand_user(&expand_vars(path, substitute));
    let full = match base_path {
        Some(base) if !base.as_os_str().is_empty() => {
            let base = expand_user(&expand_vars(&base.to_string_lossy(), substitute));
            Path::new(&base).join(path)
        }
        _ => PathBuf::from(path),
    };
    expand_glob(&full.to_string_lossy())
}
