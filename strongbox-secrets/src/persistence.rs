//! Encrypted container files
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


use crate::encryption::EncryptionAdapter;
use crate::entry::{Container, ModeFlag, ServiceMode};
use crate::error::{SecretsError, SecretsResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, warn};

/// Extension of container files
pub const CONTAINER_EXTENSION: &str = "secret";

/// Reads and writes one encrypted file per container
pub struct ContainerPersistence {
    /// Folder holding the container files
    storage_path: PathBuf,
    adapter: Arc<EncryptionAdapter>,
    mode: Arc<ModeFlag>,
}

impl ContainerPersistence {
    pub fn new<P: AsRef<Path>>(
        storage_path: P,
        adapter: Arc<EncryptionAdapter>,
        mode: Arc<ModeFlag>,
    ) -> Self {
        Self {
            storage_path: storage_path.as_ref().to_path_buf(),
            adapter,
            mode,
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Get path for a container file
    pub fn container_path(&self, container: &str) -> PathBuf {
        // Sanitize container name for filesystem
        let sanitized = container.replace('/', "_").replace('\\', "_");
        self.storage_path
            .join(format!("{}.{}", sanitized, CONTAINER_EXTENSION))
    }

    /// Create the storage folder if it doesn't exist
    pub async fn ensure_folder(&self) -> SecretsResult<()> {
        fs::create_dir_all(&self.storage_path).await?;
        Ok(())
    }

    /// Names of the containers present on disk
    pub async fn list_containers(&self) -> SecretsResult<Vec<String>> {
        self.ensure_folder().await?;

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.storage_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != CONTAINER_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(name.to_string());
            }
        }

        names.sort();
        debug!(count = names.len(), "Listed secrets containers");
        Ok(names)
    }

    /// Read, decrypt and parse a container
    ///
    /// A missing or empty file is an empty container. A decrypt failure
    /// switches the service to readonly; a parse failure does not.
    pub async fn load_container(&self, container: &str) -> SecretsResult<Container> {
        let path = self.container_path(container);
        let encrypted = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(container = container, "No file for secrets container");
                return Ok(Container::new());
            }
            Err(e) => return Err(e.into()),
        };
        if encrypted.is_empty() {
            return Ok(Container::new());
        }

        let decrypted = match self.adapter.decrypt(&encrypted) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!(container = container, error = %e, "Failed to decrypt secrets");
                self.mode.set(ServiceMode::Readonly);
                warn!("Readonly mode activated");
                return Err(SecretsError::DecryptFailed(container.to_string()));
            }
        };

        serde_json::from_slice(&decrypted).map_err(|e| {
            error!(container = container, error = %e, "Failed to parse secrets");
            SecretsError::ParseFailed(container.to_string())
        })
    }

    /// Serialize, encrypt and write a whole container
    ///
    /// The file is replaced through a rename, so readers see either the old
    /// or the new content.
    pub async fn write_container(&self, container: &str, secrets: &Container) -> SecretsResult<()> {
        if self.mode.is_readonly() {
            return Err(SecretsError::Readonly);
        }

        let json = serde_json::to_vec(secrets)?;
        let encrypted = self.adapter.encrypt(&json)?;

        self.ensure_folder().await?;
        let path = self.container_path(container);
        let staging = path.with_extension(format!("{}.tmp", CONTAINER_EXTENSION));
        fs::write(&staging, &encrypted).await?;
        fs::rename(&staging, &path).await?;

        debug!(container = container, entries = secrets.len(), "Secrets container written");
        Ok(())
    }
}
