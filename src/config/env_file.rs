use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

const ENV_FILE_NAME: &str = ".env";

/// Loads `KEY=VALUE` pairs from a `.env` file into the process environment.
///
/// With an explicit `path` only that file is read. Without one, the current working
/// directory and each of its ancestors are searched and the first `.env` found is
/// loaded. Variables already present in the environment keep their values.
///
/// Returns the file that was loaded, or `None` when the search found nothing.
///
/// # Errors
///
/// [`ConfigError::EnvFile`] when the chosen file cannot be read or parsed.
pub fn load_env_config(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    match path {
        Some(path) => load_file(path).map(|()| Some(path.to_path_buf())),
        None => match env::current_dir() {
            Ok(cwd) => load_env_config_from(&cwd),
            Err(err) => {
                debug!(error = %err, "current directory unavailable; skipping .env search");
                Ok(None)
            }
        },
    }
}

/// Searches `start` and its ancestors for a `.env` file and loads the nearest one.
pub fn load_env_config_from(start: &Path) -> Result<Option<PathBuf>, ConfigError> {
    for dir in start.ancestors() {
        let candidate = dir.join(ENV_FILE_NAME);
        if candidate.is_file() {
            load_file(&candidate)?;
            return Ok(Some(candidate));
        }
    }
    debug!(start = %start.display(), "no .env file found");
    Ok(None)
}

fn load_file(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded environment file");
    Ok(())
}
