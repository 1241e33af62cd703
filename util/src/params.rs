//! Generic parameters functions
//!
//! Parameter files are TOML files stored in the `params` directory under the software root.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::info;
use serde::de::DeserializeOwned;
use std::fs::{copy, read_to_string};
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot determine the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Cannot load the parmeter file {0:?}: {1}")]
    FileLoadError(PathBuf, std::io::Error),

    #[error("Cannot create {0:?} from its default: {1}")]
    DefaultCopyError(PathBuf, std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file
///
/// The file path is relative to the "params" directory in the software root.
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    load_from(&params_path(param_file_path)?)
}

/// Load a parameter file, creating it from its default first if it doesn't exist yet.
///
/// The default for `robot.toml` is `robot.default.toml` in the same directory. This lets a
/// checked-in default be tuned per robot without the tuned copy being tracked.
pub fn load_or_default<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    let path = params_path(param_file_path)?;
    let default_path = default_path_for(&path);

    if !path.exists() && default_path.exists() {
        info!("{:?} not found, creating it from {:?}", path, default_path);
        copy(&default_path, &path)
            .map_err(|e| LoadError::DefaultCopyError(path.clone(), e))?;
    }

    load_from(&path)
}

/// Load and parse the parameter file at the given absolute path.
pub fn load_from<P>(path: &Path) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    // Load the file into a string
    let params_str = match read_to_string(path) {
        Ok(s) => s,
        Err(e) => return Err(LoadError::FileLoadError(path.to_path_buf(), e))
    };

    // Parse the string into the parameter struct
    match toml::from_str(params_str.as_str()) {
        Ok(p) => Ok(p),
        Err(e) => Err(LoadError::DeserialiseError(e))
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn params_path(param_file_path: &str) -> Result<PathBuf, LoadError> {
    let mut path = crate::host::get_sw_root()
        .map_err(LoadError::SwRootNotFound)?;
    path.push("params");
    path.push(param_file_path);
    Ok(path)
}

/// `dir/name.toml` -> `dir/name.default.toml`
fn default_path_for(path: &Path) -> PathBuf {
    let stem = path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match path.extension() {
        Some(ext) => format!("{}.default.{}", stem, ext.to_string_lossy()),
        None => format!("{}.default", stem)
    };

    path.with_file_name(file_name)
}
