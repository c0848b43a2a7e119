//! Directory lock error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur while acquiring or releasing directory locks.
///
/// Contention variants name the blocking pid(s) so callers can render a
/// useful message. The lock never retries or queues internally; reacting
/// to a busy directory (wait, abort, write elsewhere) is up to the caller.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "another process (pid {pid}) is currently writing to '{}'; retry once it finishes, or target a different output directory",
        .directory.display()
    )]
    WriterActive { pid: u32, directory: PathBuf },

    #[error(
        "other processes (pids {pids:?}) are currently reading from '{}'; retry once they finish, or target a different output directory",
        .directory.display()
    )]
    ReadersActive { pids: Vec<u32>, directory: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LockError {
    /// Whether this is a contention error (as opposed to an I/O failure).
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            LockError::WriterActive { .. } | LockError::ReadersActive { .. }
        )
    }
}
