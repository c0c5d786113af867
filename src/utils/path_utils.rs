use crate::error::AppError;
use std::path::PathBuf;
use tracing::debug;

/// Expands tilde (~) and `$VAR` references in a path string.
pub fn expand_tilde_path_buf(path_str: &str) -> Result<PathBuf, AppError> {
    shellexpand::full(path_str)
        .map(|cow_str| PathBuf::from(cow_str.as_ref()))
        .map_err(|e| AppError::InvalidWorkerPath(format!("Failed to expand path '{}': {}", path_str, e)))
}

/// Resolves the worker executable given on the command line.
///
/// The path must exist; it is returned canonicalized so that the
/// worker's identity in logs does not depend on the caller's cwd.
pub fn resolve_worker_path(path_str: &str) -> Result<PathBuf, AppError> {
    let not_found = || AppError::InvalidWorkerPath(format!("worker not found: {}", path_str));
    let expanded_path = expand_tilde_path_buf(path_str.trim()).map_err(|e| {
        debug!(error = %e, "Worker path did not expand");
        not_found()
    })?;
    debug!(worker_path = %expanded_path.display(), "Resolving worker path");

    if expanded_path.as_os_str().is_empty() || !expanded_path.exists() {
        return Err(not_found());
    }
    if expanded_path.is_dir() {
        return Err(AppError::InvalidWorkerPath(format!(
            "worker is a directory: {}",
            expanded_path.display()
        )));
    }

    match dunce::canonicalize(&expanded_path) {
        Ok(canonical_path) => Ok(canonical_path),
        Err(_) => Ok(expanded_path),
    }
}
