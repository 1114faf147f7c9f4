use std::path::PathBuf;

use glob::{glob, PatternError};
use tracing::{debug, warn};

/// Expand one command-line pattern into the files it matches, in glob order.
///
/// Unreadable entries and directories are logged and skipped; only a
/// malformed pattern is an error.
pub fn resolve(pattern: &str) -> Result<Vec<PathBuf>, PatternError> {
    let mut files = Vec::new();
    for entry in glob(pattern)? {
        match entry {
            Ok(path) if path.is_dir() => {
                debug!("skipping directory {}", path.display());
            }
            Ok(path) => files.push(path),
            Err(err) => warn!(
                "cannot read {} while matching {pattern:?}: {}",
                err.path().display(),
                err.error()
            ),
        }
    }
    Ok(files)
}
