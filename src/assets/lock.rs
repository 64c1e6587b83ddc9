use std::{
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use fs4::FileExt;
use tracing::{debug, warn};

use super::{AssetError, AssetResult};

pub const LOCKS_DIR: &str = ".locks";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Hands out advisory file locks, one lock file per `(name, version)`.
///
/// The locks are taken with `flock`/`LockFileEx` on a fresh file handle, so
/// they serialize separate processes as well as threads of one process.
/// Acquisition is not re-entrant.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

/// Held lock; released when dropped.
#[derive(Debug)]
pub struct AssetLock {
    file: File,
    path: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self, name: &str, version: &str) -> PathBuf {
        self.dir
            .join(format!("{}@{}.lock", sanitize(name), sanitize(version)))
    }

    pub fn acquire(&self, name: &str, version: &str, timeout: Duration) -> AssetResult<AssetLock> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| AssetError::io(format!("create lock dir {}", self.dir.display()), err))?;

        let path = self.lock_path(name, version);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| AssetError::io(format!("open lock {}", path.display()), err))?;

        let deadline = Instant::now() + timeout;
        let mut announced = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(asset = name, version, "acquired lock {}", path.display());
                    return Ok(AssetLock { file, path });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(AssetError::LockTimeout {
                            name: name.to_string(),
                            version: version.to_string(),
                            origin: path.display().to_string(),
                            timeout,
                        });
                    }
                    if !announced {
                        debug!(asset = name, version, "waiting for lock held elsewhere");
                        announced = true;
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
                }
                Err(err) => {
                    return Err(AssetError::io(format!("lock {}", path.display()), err));
                }
            }
        }
    }
}

impl AssetLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AssetLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("failed to release lock {}: {err}", self.path.display());
        } else {
            debug!("released lock {}", self.path.display());
        }
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(dir.path().join(LOCKS_DIR));

        let held = locks
            .acquire("weights", "1.0", Duration::from_secs(1))
            .unwrap();
        let err = locks
            .acquire("weights", "1.0", Duration::from_millis(120))
            .unwrap_err();
        assert!(matches!(err, AssetError::LockTimeout { .. }));
        assert!(err.to_string().contains("weights"));

        drop(held);
        assert!(locks
            .acquire("weights", "1.0", Duration::from_millis(120))
            .is_ok());
    }

    #[test]
    fn different_keys_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(dir.path());

        let _a = locks.acquire("weights", "1.0", Duration::ZERO).unwrap();
        let _b = locks.acquire("weights", "2.0", Duration::ZERO).unwrap();
        let _c = locks.acquire("tokenizer", "1.0", Duration::ZERO).unwrap();
    }

    #[test]
    fn waiter_proceeds_once_holder_releases() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(dir.path());
        let released = Arc::new(AtomicBool::new(false));

        let held = locks.acquire("weights", "1.0", Duration::ZERO).unwrap();
        let waiter = {
            let locks = locks.clone();
            let released = released.clone();
            thread::spawn(move || {
                let _lock = locks
                    .acquire("weights", "1.0", Duration::from_secs(5))
                    .unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(150));
        released.store(true, Ordering::SeqCst);
        drop(held);

        assert!(waiter.join().unwrap());
    }

    const CHILD_DIR_ENV: &str = "OPENMAS_ASSETS_LOCK_CHILD_DIR";

    fn wait_for(path: &Path, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if path.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    /// Runs only when re-invoked by `another_process_holding_the_lock_blocks`:
    /// holds the lock until told to let go.
    #[test]
    #[ignore]
    fn hold_lock_in_child_process() {
        let Some(dir) = std::env::var_os(CHILD_DIR_ENV).map(PathBuf::from) else {
            return;
        };
        let locks = LockManager::new(dir.join(LOCKS_DIR));
        let held = locks
            .acquire("weights", "1.0", Duration::from_secs(5))
            .unwrap();
        fs::write(dir.join("held"), b"").unwrap();
        wait_for(&dir.join("release"), Duration::from_secs(20));
        drop(held);
    }

    #[test]
    fn another_process_holding_the_lock_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "assets::lock::tests::hold_lock_in_child_process",
                "--ignored",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(CHILD_DIR_ENV, dir.path())
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();

        let held = wait_for(&dir.path().join("held"), Duration::from_secs(20));
        let locks = LockManager::new(dir.path().join(LOCKS_DIR));
        let contended = locks.acquire("weights", "1.0", Duration::from_millis(150));
        fs::write(dir.path().join("release"), b"").unwrap();
        let status = child.wait().unwrap();

        assert!(held, "child never took the lock");
        assert!(status.success());
        assert!(matches!(contended, Err(AssetError::LockTimeout { .. })));
        assert!(locks
            .acquire("weights", "1.0", Duration::from_secs(5))
            .is_ok());
    }

    #[test]
    fn lock_file_names_are_filesystem_safe() {
        let locks = LockManager::new("/cache/.locks");
        assert_eq!(
            locks.lock_path("org/model", "v 1"),
            PathBuf::from("/cache/.locks/org_model@v_1.lock")
        );
    }
}
