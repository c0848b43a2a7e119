//! DirectoryLock — marker-file reader/writer lock with pid liveness.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use tracing::debug;

use crate::error::{LockError, LockResult};

/// The writer marker file name.
const WRITER_FILE: &str = "synth.lock";

/// Reader marker file names: `read.<pid>.<seq>.lock`.
static READER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^read\.([0-9]+)\.[0-9]+\.lock$").expect("valid pattern"));

/// Process-wide counter so concurrent atomic writes never share a temp file.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A single-writer/multi-reader lock on a directory.
///
/// Marker files carry the owning pid; every scan re-validates pid liveness
/// and deletes markers of dead processes, so a crashed holder implicitly
/// releases its lock. This is not 100% race-safe (the os may reuse a pid,
/// and acquisition is check-then-write rather than a single atomic step),
/// but it is deliberate best-effort coordination for a single-host CLI, not
/// a distributed lease.
///
/// Acquisition is optimistic: a busy directory is an immediate
/// [`LockError`], never an internal wait.
#[derive(Debug)]
pub struct DirectoryLock {
    directory: PathBuf,
    /// Per-instance sequence so threads sharing this lock instance get
    /// distinct reader marker names.
    reader_seq: AtomicU64,
}

impl DirectoryLock {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            reader_seq: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Acquire the writer lock. No other live writer or readers may exist.
    pub fn acquire_write(&self) -> LockResult<WriterLock<'_>> {
        self.ensure_no_writer()?;

        let readers = self.current_readers()?;
        if !readers.is_empty() {
            return Err(LockError::ReadersActive {
                pids: readers,
                directory: self.directory.clone(),
            });
        }

        write_file_atomic(&self.writer_file(), &std::process::id().to_string())?;
        Ok(WriterLock {
            lock: self,
            released: false,
        })
    }

    /// Acquire a reader lock. Fails if a live writer exists.
    pub fn acquire_read(&self) -> LockResult<ReaderLock> {
        self.ensure_no_writer()?;
        self.acquire_read_marker()
    }

    /// The pid of the current live writer, if any. Deletes a stale marker
    /// as a side effect.
    pub fn current_writer(&self) -> LockResult<Option<u32>> {
        let Some(contents) = read_file_if_exists(&self.writer_file())? else {
            return Ok(None);
        };
        let pid = contents.trim().parse::<u32>().ok();
        match pid {
            Some(pid) if process_exists(pid) => Ok(Some(pid)),
            _ => {
                // Stray file from a dead or unparseable owner.
                debug!(directory = %self.directory.display(), "removing stale writer marker");
                delete_file(&self.writer_file())?;
                Ok(None)
            }
        }
    }

    /// The pids of all current live readers. Deletes stale markers as a
    /// side effect. A missing directory cannot be locked and yields no
    /// readers.
    pub fn current_readers(&self) -> LockResult<Vec<u32>> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut pids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(captures) = READER_PATTERN.captures(name) else {
                continue;
            };
            match captures[1].parse::<u32>() {
                Ok(pid) if process_exists(pid) => pids.push(pid),
                _ => {
                    debug!(marker = name, "removing stale reader marker");
                    delete_file(&entry.path())?;
                }
            }
        }
        Ok(pids)
    }

    fn ensure_no_writer(&self) -> LockResult<()> {
        if let Some(pid) = self.current_writer()? {
            return Err(LockError::WriterActive {
                pid,
                directory: self.directory.clone(),
            });
        }
        Ok(())
    }

    /// Write a fresh reader marker without checking for writers first.
    fn acquire_read_marker(&self) -> LockResult<ReaderLock> {
        let seq = self.reader_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self
            .directory
            .join(format!("read.{}.{}.lock", std::process::id(), seq));
        write_file_atomic(&path, &std::process::id().to_string())?;
        Ok(ReaderLock {
            path,
            released: false,
        })
    }

    fn writer_file(&self) -> PathBuf {
        self.directory.join(WRITER_FILE)
    }
}

/// An acquired writer lock. Best-effort released on drop; use
/// [`WriterLock::release`] to observe deletion errors.
#[derive(Debug)]
pub struct WriterLock<'a> {
    lock: &'a DirectoryLock,
    released: bool,
}

impl WriterLock<'_> {
    /// Release the writer lock.
    pub fn release(mut self) -> LockResult<()> {
        self.do_release()
    }

    /// Downgrade to a reader lock.
    ///
    /// The reader marker is written *before* the writer marker is deleted,
    /// which narrows (but cannot close) the window in which the directory
    /// has no protection at all. On failure the writer lock is released.
    pub fn into_reader(mut self) -> LockResult<ReaderLock> {
        let reader = self.lock.acquire_read_marker()?;
        self.do_release()?;
        Ok(reader)
    }

    fn do_release(&mut self) -> LockResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        delete_file(&self.lock.writer_file())?;
        Ok(())
    }
}

impl Drop for WriterLock<'_> {
    fn drop(&mut self) {
        let _ = self.do_release();
    }
}

/// An acquired reader lock. Best-effort released on drop; use
/// [`ReaderLock::release`] to observe deletion errors.
#[derive(Debug)]
pub struct ReaderLock {
    path: PathBuf,
    released: bool,
}

impl ReaderLock {
    /// Release the reader lock.
    pub fn release(mut self) -> LockResult<()> {
        self.do_release()
    }

    fn do_release(&mut self) -> LockResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        delete_file(&self.path)?;
        Ok(())
    }
}

impl Drop for ReaderLock {
    fn drop(&mut self) {
        let _ = self.do_release();
    }
}

/// Write via a temp file in the same directory plus rename, so a concurrent
/// reader never observes a partially written marker.
fn write_file_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}_{}", std::process::id(), counter));
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

fn read_file_if_exists(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Probe a pid with the zero signal. `ESRCH` means the process is gone;
/// `EPERM` means it exists under another user. Pid reuse can make a dead
/// owner look alive; accepted for single-host coordination.
#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    // kill(0, ...) would target the process group, never a real owner.
    if pid == 0 {
        return false;
    }
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a cheap portable probe, never steal a possibly-held lock.
#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// A pid that cannot exist: beyond any real pid_max, so the zero-signal
    /// probe reports it dead.
    const DEAD_PID: &str = "2147483647";

    fn lock_in(dir: &Path) -> DirectoryLock {
        DirectoryLock::new(dir)
    }

    #[test]
    fn writer_excludes_second_writer() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let held = lock.acquire_write().unwrap();

        let other = lock_in(dir.path());
        let err = other.acquire_write().unwrap_err();
        match err {
            LockError::WriterActive { pid, .. } => assert_eq!(pid, std::process::id()),
            other => panic!("expected WriterActive, got {other:?}"),
        }

        held.release().unwrap();
        other.acquire_write().unwrap();
    }

    #[test]
    fn writer_excludes_readers() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let held = lock.acquire_write().unwrap();

        let err = lock_in(dir.path()).acquire_read().unwrap_err();
        assert!(err.is_busy());

        held.release().unwrap();
        lock_in(dir.path()).acquire_read().unwrap();
    }

    #[test]
    fn readers_exclude_writer() {
        let dir = tempfile::tempdir().unwrap();
        let reader = lock_in(dir.path()).acquire_read().unwrap();

        let err = lock_in(dir.path()).acquire_write().unwrap_err();
        match err {
            LockError::ReadersActive { pids, .. } => {
                assert_eq!(pids, vec![std::process::id()]);
            }
            other => panic!("expected ReadersActive, got {other:?}"),
        }

        reader.release().unwrap();
        lock_in(dir.path()).acquire_write().unwrap();
    }

    #[test]
    fn multiple_readers_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let first = lock.acquire_read().unwrap();
        let second = lock.acquire_read().unwrap();
        let third = lock_in(dir.path()).acquire_read().unwrap();

        assert_eq!(lock.current_readers().unwrap().len(), 3);

        first.release().unwrap();
        second.release().unwrap();
        third.release().unwrap();
        assert!(lock.current_readers().unwrap().is_empty());
    }

    #[test]
    fn marker_contains_our_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let _held = lock.acquire_write().unwrap();

        let contents = fs::read_to_string(dir.path().join(WRITER_FILE)).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn stale_writer_marker_is_healed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(WRITER_FILE), DEAD_PID).unwrap();

        let lock = lock_in(dir.path());
        lock.acquire_write().unwrap().release().unwrap();
        assert!(!dir.path().join(WRITER_FILE).exists());
    }

    #[test]
    fn stale_reader_marker_is_healed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join(format!("read.{DEAD_PID}.1.lock"));
        fs::write(&marker, DEAD_PID).unwrap();

        lock_in(dir.path()).acquire_write().unwrap();
        assert!(!marker.exists());
    }

    #[test]
    fn malformed_writer_marker_is_healed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(WRITER_FILE), "not-a-pid").unwrap();

        let lock = lock_in(dir.path());
        assert_eq!(lock.current_writer().unwrap(), None);
        lock.acquire_write().unwrap();
    }

    #[test]
    fn live_foreign_writer_blocks() {
        let dir = tempfile::tempdir().unwrap();
        // Pid 1 always exists on unix; the probe reports it alive even when
        // signalling it is not permitted.
        fs::write(dir.path().join(WRITER_FILE), "1").unwrap();

        let err = lock_in(dir.path()).acquire_write().unwrap_err();
        match err {
            LockError::WriterActive { pid, .. } => assert_eq!(pid, 1),
            other => panic!("expected WriterActive, got {other:?}"),
        }
    }

    #[test]
    fn missing_directory_is_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("synth-out");
        let lock = lock_in(&nested);

        assert!(lock.current_readers().unwrap().is_empty());
        assert_eq!(lock.current_writer().unwrap(), None);
        // Acquisition creates the directory.
        let _held = lock.acquire_write().unwrap();
        assert!(nested.join(WRITER_FILE).exists());
    }

    #[test]
    fn reader_markers_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let first = lock.acquire_read().unwrap();
        let second = lock.acquire_read().unwrap();
        assert_ne!(first.path, second.path);
    }

    #[test]
    fn write_downgrades_to_read() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let writer = lock.acquire_write().unwrap();
        let reader = writer.into_reader().unwrap();

        // Writer gone, reader held: reads allowed, writes blocked.
        assert!(!dir.path().join(WRITER_FILE).exists());
        lock_in(dir.path()).acquire_read().unwrap();
        let err = lock_in(dir.path()).acquire_write().unwrap_err();
        assert!(matches!(err, LockError::ReadersActive { .. }));

        reader.release().unwrap();
    }

    #[test]
    fn dropped_handles_release() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lock = lock_in(dir.path());
            let _writer = lock.acquire_write().unwrap();
        }
        lock_in(dir.path()).acquire_write().unwrap();

        {
            let lock = lock_in(dir.path());
            let _reader = lock.acquire_read().unwrap();
        }
        lock_in(dir.path()).acquire_write().unwrap();
    }

    #[test]
    fn release_frees_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path());
        let writer = lock.acquire_write().unwrap();
        writer.release().unwrap();
        lock.acquire_write().unwrap();
    }
}
