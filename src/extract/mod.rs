//! Extractors for vendor export files.
//!
//! Each extractor turns one file into one record keyed by the file's full
//! path. [`discover_files`] finds the inputs and [`extract_all`] applies the
//! batch failure policy: structural errors abort, any other per-file error
//! is logged and the file is skipped.

pub mod estat;
pub mod form_key;
pub mod insitu;
pub mod medrx;
pub mod verifit;

use std::path::Path;

use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::error::{ExtractError, Result};
use crate::model::RecordId;

/// Lists files under `dir` whose file name matches `pattern` (a glob such as
/// `*.xml`), sorted by full path.
pub fn discover_files(dir: &Path, pattern: &str, recursive: bool) -> Result<Vec<RecordId>> {
    if !dir.is_dir() {
        return Err(ExtractError::MissingDirectory(dir.to_path_buf()));
    }

    let matcher = glob::Pattern::new(pattern).map_err(|source| ExtractError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if matcher.matches(&name) {
            files.push(RecordId::new(entry.path()));
        }
    }

    if files.is_empty() {
        return Err(ExtractError::NoMatchingFiles {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
        });
    }

    files.sort();
    debug!(dir = %dir.display(), pattern, count = files.len(), "Discovered input files");
    Ok(files)
}

/// Runs `extract` over every file.
///
/// # Errors
///
/// Returns the first structural error (see [`ExtractError::is_structural`]).
/// Other errors are logged and the file is left out of the result.
pub fn extract_all<T, F>(files: &[RecordId], mut extract: F) -> Result<Vec<T>>
where
    F: FnMut(&RecordId) -> Result<T>,
{
    let mut records = Vec::with_capacity(files.len());
    let mut skipped = 0usize;

    for file in files {
        match extract(file) {
            Ok(record) => records.push(record),
            Err(e) if e.is_structural() => return Err(e),
            Err(e) => {
                error!(file = %file, error = %e, "Skipping malformed file");
                skipped += 1;
            }
        }
    }

    info!(processed = records.len(), skipped, "Extraction finished");
    Ok(records)
}
