//! Secrets service: containers of named secrets, encrypted at rest
//!
//! Mutations follow lock → reload from disk → mutate → write whole container
//! → unlock. Reloading inside the lock picks up changes made by other
//! processes since this one last read the file. Reads are served from the
//! in-memory store without locking or reloading, so they may lag behind
//! another process until the next reload.
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


use crate::cipher::{Aes256GcmCipher, Cipher};
use crate::encryption::{EncryptionAdapter, EncryptionKeySet};
use crate::entry::{Container, ModeFlag, SecretEntry, ServiceMode};
use crate::error::{SecretsError, SecretsResult};
use crate::lock::{ExpiringLock, FileLock, LockManager, DEFAULT_LOCK_EXPIRY, LOCK_FILE_NAME};
use crate::persistence::ContainerPersistence;
use crate::store::ContainerStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strongbox_config::SecretsConfig;
use tracing::{info, warn};

/// Container used when callers don't name one
pub const DEFAULT_CONTAINER_NAME: &str = "default";

/// Container reserved for API keys
pub const API_KEY_CONTAINER_NAME: &str = "apiKeys";

/// Size in bytes of generated secrets and API keys, before base64
pub const GENERATED_SECRET_BYTES: usize = 32;

/// Generate a random base64 secret
pub(crate) fn generate_random_secret() -> String {
    let mut bytes = [0u8; GENERATED_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Local encrypted secrets service
///
/// Construct one per process and share it through an `Arc`.
pub struct SecretsService {
    pub(crate) persistence: ContainerPersistence,
    pub(crate) adapter: Arc<EncryptionAdapter>,
    pub(crate) lock: LockManager,
    pub(crate) store: ContainerStore,
    pub(crate) mode: Arc<ModeFlag>,
}

impl SecretsService {
    /// Create a service using AES-256-GCM and the file lock
    ///
    /// # Arguments
    /// * `storage_path` - Folder holding the container files and the lock file
    /// * `keys` - Configured encryption keys
    pub fn new<P: AsRef<Path>>(storage_path: P, keys: EncryptionKeySet) -> Self {
        Self::with_collaborators(
            storage_path,
            keys,
            Arc::new(Aes256GcmCipher),
            Arc::new(FileLock::default()),
            DEFAULT_LOCK_EXPIRY,
        )
    }

    /// Create a service with explicit cipher and lock implementations
    pub fn with_collaborators<P: AsRef<Path>>(
        storage_path: P,
        keys: EncryptionKeySet,
        cipher: Arc<dyn Cipher>,
        lock: Arc<dyn ExpiringLock>,
        lock_expiry: Duration,
    ) -> Self {
        let storage_path = storage_path.as_ref();
        let adapter = Arc::new(EncryptionAdapter::new(cipher, keys));
        let mode = Arc::new(ModeFlag::default());

        info!(path = %storage_path.display(), "Secrets Service initialized");

        Self {
            persistence: ContainerPersistence::new(storage_path, adapter.clone(), mode.clone()),
            adapter,
            lock: LockManager::new(lock, storage_path.join(LOCK_FILE_NAME), lock_expiry),
            store: ContainerStore::new(),
            mode,
        }
    }

    /// Build the service from configuration and load every container on disk
    pub async fn from_config(config: &SecretsConfig) -> SecretsResult<Arc<Self>> {
        let keys = EncryptionKeySet::parse(config.encryption_keys()?)?;
        let service = Self::with_collaborators(
            config.secrets_dir(),
            keys,
            Arc::new(Aes256GcmCipher),
            Arc::new(FileLock::default()),
            Duration::from_millis(config.lock_expiry_ms),
        );
        service.load_all_containers().await?;
        Ok(Arc::new(service))
    }

    pub fn mode(&self) -> ServiceMode {
        self.mode.get()
    }

    pub fn is_readonly(&self) -> bool {
        self.mode.is_readonly()
    }

    pub fn storage_path(&self) -> &Path {
        self.persistence.storage_path()
    }

    /// Load every container present on disk into the store
    ///
    /// Startup caching is lenient: a container that fails to load is cached
    /// empty so reads keep working. Mutations reload strictly.
    pub async fn load_all_containers(&self) -> SecretsResult<()> {
        let names = self.persistence.list_containers().await?;
        if names.is_empty() {
            info!("No secrets containers found");
        }
        for name in names {
            self.load_container(&name).await?;
        }
        Ok(())
    }

    /// Re-persist every container present on disk from the store
    pub async fn force_write_all_containers(&self) -> SecretsResult<()> {
        let names = self.persistence.list_containers().await?;
        if names.is_empty() {
            info!("No secrets containers found");
        }
        for name in names {
            self.write_container(&name).await?;
        }
        Ok(())
    }

    /// Replace the cached container with its on-disk content
    ///
    /// On failure the cache is left as it was. A decrypt failure has already
    /// switched the service to readonly at this point.
    pub(crate) async fn reload_into_store(&self, name: &str) -> SecretsResult<()> {
        let container = self.persistence.load_container(name).await?;
        info!(container = name, entries = container.len(), "Secrets container loaded");
        self.store.replace(name, container);
        Ok(())
    }

    /// Cache a container, falling back to an empty one when it can't be loaded
    ///
    /// A container cached empty after a failure is never written back here.
    async fn load_container(&self, name: &str) -> SecretsResult<()> {
        let is_api_keys = name == API_KEY_CONTAINER_NAME;
        match self.reload_into_store(name).await {
            Ok(()) if is_api_keys => self.ensure_api_key_sentinel().await?,
            Ok(()) => {}
            Err(e) => {
                warn!(container = name, error = %e, "Initializing secrets container");
                self.store.replace(name, Container::new());
                if is_api_keys {
                    self.insert_api_key_sentinel();
                }
            }
        }
        Ok(())
    }

    /// Strict reload ahead of a mutation, run while holding the write lock
    ///
    /// Load errors propagate so that nothing gets written over a container
    /// that could not be read. The API key sentinel is only added in memory;
    /// it reaches disk with the mutation's own write.
    async fn reload_for_mutation(&self, name: &str) -> SecretsResult<()> {
        self.reload_into_store(name).await?;
        if name == API_KEY_CONTAINER_NAME {
            self.insert_api_key_sentinel();
        }
        Ok(())
    }

    pub(crate) async fn write_container(&self, name: &str) -> SecretsResult<()> {
        let secrets = self.store.get_or_init(name);
        self.persistence.write_container(name, &secrets).await
    }

    /// Store a secret, flagged when `is_admin` is given
    pub async fn put_secret(
        &self,
        container: &str,
        name: &str,
        secret: impl Into<String>,
        is_admin: Option<bool>,
    ) -> SecretsResult<()> {
        if self.mode.is_readonly() {
            return Err(SecretsError::Readonly);
        }
        let entry = SecretEntry::new(secret, is_admin);
        self.lock
            .with_lock(|| async move {
                self.reload_for_mutation(container).await?;
                self.store.update(container, |secrets| {
                    secrets.insert(name.to_string(), entry);
                });
                self.write_container(container).await
            })
            .await
    }

    pub async fn put_secret_in_default_container(
        &self,
        name: &str,
        secret: impl Into<String>,
    ) -> SecretsResult<()> {
        self.put_secret(DEFAULT_CONTAINER_NAME, name, secret, None).await
    }

    /// Read a secret from the in-memory store
    pub fn get_secret(&self, container: &str, name: &str) -> SecretsResult<SecretEntry> {
        if self.mode.is_readonly() {
            return Err(SecretsError::Readonly);
        }
        self.store
            .entry(container, name)
            .ok_or_else(|| SecretsError::not_found(container, name))
    }

    pub fn get_secret_from_default_container(&self, name: &str) -> SecretsResult<SecretEntry> {
        self.get_secret(DEFAULT_CONTAINER_NAME, name)
    }

    /// Every secret of a container, from the in-memory store
    pub fn get_all_secrets(&self, container: &str) -> SecretsResult<Container> {
        if self.mode.is_readonly() {
            return Err(SecretsError::Readonly);
        }
        Ok(self.store.get_or_init(container))
    }

    /// Remove a secret; fails with not found (and writes nothing) if it is absent
    pub async fn delete_secret(&self, container: &str, name: &str) -> SecretsResult<()> {
        if self.mode.is_readonly() {
            return Err(SecretsError::Readonly);
        }
        self.lock
            .with_lock(|| async move {
                self.reload_for_mutation(container).await?;
                if self.store.update(container, |secrets| secrets.remove(name)).is_none() {
                    return Err(SecretsError::not_found(container, name));
                }
                self.write_container(container).await
            })
            .await
    }

    /// Generate a random secret and store it in the default container
    pub async fn generate_server_secret(&self, name: &str) -> SecretsResult<String> {
        let secret = generate_random_secret();
        self.put_secret_in_default_container(name, secret.clone()).await?;
        Ok(secret)
    }
}
