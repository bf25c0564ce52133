//! Cross-process write lock
//!
//! Every mutation of a container runs inside [`LockManager::with_lock`]. The
//! lock is a single file shared by the whole service, so writes to different
//! containers are serialized as well.
//!
//! The lock expires: a holder that crashes without releasing is recovered
//! once the expiry elapses. A holder that is merely slow loses exclusivity
//! past the same point, so the lock only guarantees mutual exclusion for
//! critical sections shorter than the expiry.
//!
//! Taking over an expired lock first renames the file to a name private to
//! the waiter, so two waiters that saw the same stale record can't both
//! remove it. A waiter that finds it moved a fresh lock links it back; if a
//! third waiter created the lock in that short gap, two holders coexist
//! until one of them releases.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{SecretsError, SecretsResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock file name inside the secrets folder
pub const LOCK_FILE_NAME: &str = "secret.lock";

/// Default lock expiry
pub const DEFAULT_LOCK_EXPIRY: Duration = Duration::from_secs(10);

/// Proof of ownership returned by [`ExpiringLock::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub path: PathBuf,
    pub holder: String,
}

/// Expiring mutual-exclusion lock shared between processes
#[async_trait]
pub trait ExpiringLock: Send + Sync {
    /// Wait until the lock at `path` is held by the caller
    async fn acquire(&self, path: &Path, expiry: Duration) -> SecretsResult<LockToken>;

    /// Give the lock back
    async fn release(&self, token: LockToken) -> SecretsResult<()>;
}

/// Contents of the lock file
#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    holder: String,
    acquired_at: i64,
}

/// Lock backed by an exclusively created file
///
/// The file records its holder and acquisition time. A lock file older than
/// the expiry is considered abandoned and is removed by the next caller.
#[derive(Debug, Clone)]
pub struct FileLock {
    poll_interval: Duration,
    /// Acquisition gives up after `expiry * wait_factor`
    wait_factor: u32,
}

impl Default for FileLock {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            wait_factor: 3,
        }
    }
}

impl FileLock {
    pub fn new(poll_interval: Duration, wait_factor: u32) -> Self {
        Self {
            poll_interval,
            wait_factor: wait_factor.max(1),
        }
    }

    /// How long the current holder has held the lock, if it is still there
    async fn held_for(path: &Path) -> SecretsResult<Option<Duration>> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Ok(record) = serde_json::from_slice::<LockRecord>(&content) {
            let elapsed_ms = chrono::Utc::now().timestamp_millis() - record.acquired_at;
            return Ok(Some(Duration::from_millis(elapsed_ms.max(0) as u64)));
        }

        // Holder has created the file but not written its record yet
        let modified = match fs::metadata(path).await {
            Ok(metadata) => metadata.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default(),
        ))
    }

    async fn try_create(path: &Path, holder: &str) -> SecretsResult<bool> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let record = LockRecord {
            holder: holder.to_string(),
            acquired_at: chrono::Utc::now().timestamp_millis(),
        };
        file.write_all(&serde_json::to_vec(&record)?).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Remove the lock file when its holder has expired
    ///
    /// Returns true when the caller should retry creating the lock right away.
    async fn take_over_if_expired(
        path: &Path,
        expiry: Duration,
        holder: &str,
    ) -> SecretsResult<bool> {
        match Self::held_for(path).await? {
            None => return Ok(true),
            Some(held_for) if held_for < expiry => return Ok(false),
            Some(_) => {}
        }
        Self::remove_if_still_expired(path, expiry, holder).await
    }

    /// Move the lock file aside and delete it only if the moved file is expired
    async fn remove_if_still_expired(
        path: &Path,
        expiry: Duration,
        holder: &str,
    ) -> SecretsResult<bool> {
        let claimed = path.with_extension(format!("lock.{}.stale", holder));
        match fs::rename(path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        match Self::held_for(&claimed).await? {
            Some(held_for) if held_for < expiry => {
                // Another waiter already replaced the stale lock
                let restored = fs::hard_link(&claimed, path).await;
                fs::remove_file(&claimed).await?;
                match restored {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        warn!(lock = %path.display(), "Lock recreated while restoring its holder");
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(false)
            }
            Some(held_for) => {
                warn!(
                    lock = %path.display(),
                    held_ms = held_for.as_millis() as u64,
                    "Lock expired, taking it over"
                );
                match fs::remove_file(&claimed).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
                    Err(e) => Err(e.into()),
                }
            }
            None => Ok(true),
        }
    }
}

#[async_trait]
impl ExpiringLock for FileLock {
    async fn acquire(&self, path: &Path, expiry: Duration) -> SecretsResult<LockToken> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let holder = Uuid::new_v4().to_string();
        let deadline = Instant::now() + expiry * self.wait_factor;

        loop {
            if Self::try_create(path, &holder).await? {
                debug!(lock = %path.display(), holder = %holder, "Lock acquired");
                return Ok(LockToken {
                    path: path.to_path_buf(),
                    holder,
                });
            }

            if Self::take_over_if_expired(path, expiry, &holder).await? {
                continue;
            }

            if Instant::now() >= deadline {
                return Err(SecretsError::Lock(format!(
                    "Timed out waiting for {}",
                    path.display()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&self, token: LockToken) -> SecretsResult<()> {
        let content = match fs::read(&token.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(lock = %token.path.display(), "Lock file already gone on release");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<LockRecord>(&content) {
            Ok(record) if record.holder == token.holder => {
                fs::remove_file(&token.path).await?;
                debug!(lock = %token.path.display(), holder = %token.holder, "Lock released");
            }
            _ => {
                warn!(
                    lock = %token.path.display(),
                    holder = %token.holder,
                    "Lock was taken over after expiry, leaving it to the new holder"
                );
            }
        }
        Ok(())
    }
}

/// Serializes mutating sequences behind one expiring lock
pub struct LockManager {
    lock: Arc<dyn ExpiringLock>,
    path: PathBuf,
    expiry: Duration,
    /// In-process ordering, independent of the external lock
    local: tokio::sync::Mutex<()>,
}

impl LockManager {
    pub fn new(lock: Arc<dyn ExpiringLock>, path: PathBuf, expiry: Duration) -> Self {
        Self {
            lock,
            path,
            expiry,
            local: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `critical_section` while holding the lock
    ///
    /// The lock is released whether the section succeeds or fails. If both
    /// the section and the release fail, the section's error is returned.
    pub async fn with_lock<T, F, Fut>(&self, critical_section: F) -> SecretsResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SecretsResult<T>>,
    {
        let _local = self.local.lock().await;
        let token = self.lock.acquire(&self.path, self.expiry).await?;

        let result = critical_section().await;
        let released = self.lock.release(token).await;

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                warn!(error = %release_error, "Failed to release lock after failed mutation");
                Err(e)
            }
        }
    }
}
