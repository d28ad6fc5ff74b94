use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::service::{Logger, SerialStore};

/// File-backed serial store. The current value lives as decimal text at
/// `path`; every allocation takes an intra-process mutex plus an exclusive
/// `<path>.lock` file, then persists the incremented value with
/// fsync + rename before releasing both.
pub struct FileSerialStore {
    path: PathBuf,
    lock_path: PathBuf,
    log: Arc<dyn Logger>,
    mu: Mutex<()>,
}

impl FileSerialStore {
    /// Creates a store at `path`, creating the parent directory (0700) if
    /// needed. The file itself appears on first allocation.
    pub fn new(path: impl Into<PathBuf>, log: Arc<dyn Logger>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            bail!("serial store path required");
        }
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(dir)
                    .with_context(|| format!("create {}", dir.display()))?;
            }
        }
        let lock_path = append_suffix(&path, ".lock");
        Ok(FileSerialStore {
            path,
            lock_path,
            log,
            mu: Mutex::new(()),
        })
    }

    fn acquire_lock(&self) -> Result<LockFile> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                bail!("serial store locked: {}", self.lock_path.display());
            }
            Err(err) => return Err(err).context("create lock"),
        };
        // Best-effort owner hint for operators inspecting a stale lock.
        let _ = writeln!(file, "pid={}", std::process::id());
        Ok(LockFile {
            path: self.lock_path.clone(),
            log: self.log.clone(),
        })
    }

    fn read(&self) -> Result<u64> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err).context("read serial"),
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        text.parse::<u64>().context("parse serial")
    }

    fn write(&self, value: u64) -> Result<()> {
        let tmp = append_suffix(&self.path, ".tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)
            .context("open tmp")?;
        writeln!(file, "{}", value).context("write serial")?;
        file.sync_all().context("fsync")?;
        drop(file);
        fs::rename(&tmp, &self.path).context("rename")?;
        // Best-effort directory fsync so the rename itself is durable.
        if let Some(dir) = self.path.parent() {
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SerialStore for FileSerialStore {
    /// Reads the current value, increments it, and writes it back
    /// atomically. If anything fails before the rename, the stored value
    /// is unchanged.
    async fn next(&self) -> Result<u64> {
        let _guard = self
            .mu
            .lock()
            .map_err(|_| anyhow::anyhow!("serial store mutex poisoned"))?;

        let _lock = self.acquire_lock()?;
        let current = self.read().inspect_err(|err| {
            self.log.error(
                "read serial failed",
                &[("error".to_string(), err.to_string())],
            );
        })?;
        let next = current + 1;
        self.write(next).inspect_err(|err| {
            self.log.error(
                "write serial failed",
                &[
                    ("serial".to_string(), next.to_string()),
                    ("error".to_string(), err.to_string()),
                ],
            );
        })?;
        self.log.debug(
            "serial allocated (file)",
            &[
                ("serial".to_string(), next.to_string()),
                ("path".to_string(), self.path.display().to_string()),
            ],
        );
        Ok(next)
    }
}

/// Removes the lock file when allocation ends, on both success and error
/// paths.
struct LockFile {
    path: PathBuf,
    log: Arc<dyn Logger>,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            self.log.warn(
                "release serial lock failed",
                &[("error".to_string(), err.to_string())],
            );
        }
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::logging::NopLogger;
    use tempfile::tempdir;

    fn store(path: &Path) -> FileSerialStore {
        FileSerialStore::new(path, Arc::new(NopLogger)).unwrap()
    }

    #[tokio::test]
    async fn sequence_starts_at_one_and_increments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial");
        let s = store(&path);
        assert_eq!(s.next().await.unwrap(), 1);
        assert_eq!(s.next().await.unwrap(), 2);
        assert_eq!(s.next().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn restart_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial");
        {
            let s = store(&path);
            for _ in 0..5 {
                s.next().await.unwrap();
            }
        }
        let s = store(&path);
        assert_eq!(s.next().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn read_tolerates_whitespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial");
        fs::write(&path, "  41\n\n").unwrap();
        let s = store(&path);
        assert_eq!(s.next().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn garbage_content_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial");
        fs::write(&path, "not-a-number").unwrap();
        let s = store(&path);
        assert!(s.next().await.is_err());
        // and the stored value is unchanged
        assert_eq!(fs::read_to_string(&path).unwrap(), "not-a-number");
    }

    #[tokio::test]
    async fn existing_lock_file_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial");
        let s = store(&path);
        fs::write(append_suffix(&path, ".lock"), "pid=1\n").unwrap();
        let err = s.next().await.unwrap_err();
        assert!(err.to_string().contains("locked"));
    }

    #[tokio::test]
    async fn lock_file_is_removed_after_allocation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial");
        let s = store(&path);
        s.next().await.unwrap();
        assert!(!append_suffix(&path, ".lock").exists());
    }

    #[tokio::test]
    async fn value_file_ends_with_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial");
        let s = store(&path);
        s.next().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n");
    }
}
