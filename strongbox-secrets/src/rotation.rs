//! Encryption key rotation
//!
//! A container that fails to decrypt puts the service in readonly mode. The
//! operator then configures `new,old` and triggers a rotation: every
//! container is read back with the old key and, only once all of them
//! decrypted, rewritten with the new one.
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


use crate::entry::{Container, ServiceMode};
use crate::error::{SecretsError, SecretsResult};
use crate::service::{SecretsService, API_KEY_CONTAINER_NAME};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Result of [`SecretsService::rotate_key`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationOutcome {
    /// Service is active, nothing to recover
    NotRequired,
    /// Readonly, but the previous key is not configured
    NotPossible,
    /// The previous key does not decrypt the stored containers either
    WrongKey,
    /// Containers were re-encrypted with the write key
    Completed,
}

impl RotationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RotationOutcome::NotPossible | RotationOutcome::WrongKey)
    }
}

impl SecretsService {
    /// Recover from readonly mode by re-encrypting with the write key
    ///
    /// Runs under the write lock. The service stays readonly, and nothing is
    /// written, until every container has been decrypted with the previous key.
    pub async fn rotate_key(&self) -> SecretsResult<RotationOutcome> {
        if !self.is_readonly() {
            debug!("Secrets service active, no key rotation needed");
            return Ok(RotationOutcome::NotRequired);
        }
        if !self.adapter.keys().has_previous_key() {
            warn!("Rotation not possible, the previous key is not configured");
            return Ok(RotationOutcome::NotPossible);
        }

        self.lock.with_lock(|| self.rotate_locked()).await
    }

    async fn rotate_locked(&self) -> SecretsResult<RotationOutcome> {
        info!("Secrets encryption key rotation detected");
        self.adapter.read_with_previous_key();

        let staged = self.decrypt_all_with_previous_key().await;
        self.adapter.read_with_write_key();
        let Some(decrypted) = staged? else {
            return Ok(RotationOutcome::WrongKey);
        };

        let count = decrypted.len();
        for (name, container) in decrypted {
            self.store.replace(&name, container);
        }
        if self.store.contains(API_KEY_CONTAINER_NAME) {
            self.insert_api_key_sentinel();
        }
        self.mode.set(ServiceMode::Active);
        self.force_write_all_containers().await?;

        info!(containers = count, "Re-encrypting secrets on disk completed");
        Ok(RotationOutcome::Completed)
    }

    /// Load every container on disk without touching the store
    ///
    /// `None` when one of them doesn't decrypt with the previous key either.
    async fn decrypt_all_with_previous_key(
        &self,
    ) -> SecretsResult<Option<Vec<(String, Container)>>> {
        let names = self.persistence.list_containers().await?;
        let mut decrypted = Vec::with_capacity(names.len());
        for name in names {
            match self.persistence.load_container(&name).await {
                Ok(container) => decrypted.push((name, container)),
                Err(SecretsError::DecryptFailed(_)) => {
                    warn!(
                        container = %name,
                        "Rotation not possible because wrong decryption key was provided. \
                         The old key should be the second one in the list"
                    );
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(decrypted))
    }
}
