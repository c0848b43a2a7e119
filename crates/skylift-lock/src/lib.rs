//! skylift-lock — cross-process locking of the synthesis output directory.
//!
//! A single-writer/multi-reader advisory lock over a directory, backed by
//! marker files containing process ids. Liveness of the recorded pids is
//! checked on every scan, so locks left behind by crashed processes heal
//! themselves without a recovery step.
//!
//! # On-disk convention
//!
//! ```text
//! <dir>/synth.lock             — the writer, file contents = ASCII pid
//! <dir>/read.<pid>.<seq>.lock  — one per reader, file contents = ASCII pid
//! ```
//!
//! Any external tool can determine lock status from this convention alone.

pub mod error;
pub mod lock;

pub use error::{LockError, LockResult};
pub use lock::{DirectoryLock, ReaderLock, WriterLock};
