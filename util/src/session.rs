//! Session management
//!
//! A session is one run of an executable. Starting a session fixes the epoch used to timestamp
//! log records and creates a directory for the run under the software root:
//!
//! ```text
//! <sw_root>/<sessions_dir>/<exec_name>_<YYYYmmdd_HHMMSS>/<exec_name>.log
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::{host, time};

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

/// Time at which the session was started, set once per process.
static EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

/// strftime format used to name session directories
const DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Paths belonging to the current session
#[derive(Clone, Debug)]
pub struct Session {
    /// Directory holding everything written during this run
    pub session_root: PathBuf,

    /// Log file for this run
    pub log_file_path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot determine the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Cannot create the session directory {0:?}: {1}")]
    CannotCreateDir(PathBuf, std::io::Error),

    #[error("A session has already been started in this process ({0})")]
    AlreadyStarted(conquer_once::TryInitError),
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the session for this process.
    ///
    /// Only one session can be started per process, a second call returns
    /// `SessionError::AlreadyStarted`.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let now = Utc::now();
        EPOCH.try_init_once(|| now)
            .map_err(SessionError::AlreadyStarted)?;

        let session_root = host::get_sw_root()
            .map_err(SessionError::SwRootNotFound)?
            .join(sessions_dir)
            .join(format!("{}_{}", exec_name, now.format(DIR_TIMESTAMP_FORMAT)));

        fs::create_dir_all(&session_root)
            .map_err(|e| SessionError::CannotCreateDir(session_root.clone(), e))?;

        let log_file_path = session_root.join(format!("{}.log", exec_name));

        Ok(Self {
            session_root,
            log_file_path,
        })
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Seconds elapsed since the session started, `0.0` before a session is started.
pub fn get_elapsed_seconds() -> f64 {
    EPOCH.get()
        .map(|epoch| time::duration_to_seconds(Utc::now() - *epoch).unwrap_or(f64::NAN))
        .unwrap_or(0.0)
}

/// The session epoch, if a session has been started.
pub fn get_epoch() -> Option<&'static DateTime<Utc>> {
    EPOCH.get()
}
