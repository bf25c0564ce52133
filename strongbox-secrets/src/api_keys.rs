//! API keys, stored in the reserved `apiKeys` container
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


use crate::entry::{Container, SecretEntry};
use crate::error::SecretsResult;
use crate::service::{generate_random_secret, SecretsService, API_KEY_CONTAINER_NAME};
use tracing::{info, warn};

/// True when `api_key` is stored as a plain value
///
/// Flagged entries hold a `{secret, isAdmin}` object, never equal to a bare
/// key, so keys generated with an admin flag do not match here.
fn contains_plain_value(container: &Container, api_key: &str) -> bool {
    container
        .values()
        .any(|entry| entry.as_plain() == Some(api_key))
}

impl SecretsService {
    /// Generate a random API key and store it under `key_id`
    pub async fn generate_api_key(
        &self,
        key_id: &str,
        is_admin: Option<bool>,
    ) -> SecretsResult<String> {
        let api_key = generate_random_secret();
        self.put_secret(API_KEY_CONTAINER_NAME, key_id, api_key.clone(), is_admin)
            .await?;
        info!(key_id = key_id, admin = is_admin.unwrap_or(false), "API key generated");
        Ok(api_key)
    }

    pub async fn delete_api_key(&self, key_id: &str) -> SecretsResult<()> {
        self.delete_secret(API_KEY_CONTAINER_NAME, key_id).await
    }

    /// Reload the API key container and check `api_key` against its plain values
    ///
    /// The reload may persist the sentinel, so it runs under the write lock.
    /// If it fails, the cached container is used.
    pub async fn validate_api_key(&self, api_key: &str) -> bool {
        let reloaded = self
            .lock
            .with_lock(|| async {
                self.reload_into_store(API_KEY_CONTAINER_NAME).await?;
                self.ensure_api_key_sentinel().await
            })
            .await;
        if let Err(e) = reloaded {
            warn!(error = %e, "Failed to reload API key container, using cached keys");
        }
        self.store
            .snapshot(API_KEY_CONTAINER_NAME)
            .is_some_and(|container| contains_plain_value(&container, api_key))
    }

    /// Check `api_key` against the admin-flagged entries of the cached container
    pub fn is_admin_api_key(&self, api_key: &str) -> bool {
        self.store
            .snapshot(API_KEY_CONTAINER_NAME)
            .is_some_and(|container| {
                container.values().any(|entry| {
                    matches!(entry, SecretEntry::Flagged { secret, is_admin: true } if secret == api_key)
                })
            })
    }

    pub fn api_keys_container_is_empty(&self) -> bool {
        self.store
            .snapshot(API_KEY_CONTAINER_NAME)
            .map_or(true, |container| container.is_empty())
    }

    /// Add the hash of the configured key material to the cached API key container
    ///
    /// Returns true when it was missing. A changed key configuration shows up
    /// as a missing sentinel on restart.
    pub(crate) fn insert_api_key_sentinel(&self) -> bool {
        let sentinel = self.adapter.keys().material_hash();
        let inserted = self.store.update(API_KEY_CONTAINER_NAME, |container| {
            if contains_plain_value(container, &sentinel) {
                return false;
            }
            container.insert(sentinel.clone(), SecretEntry::Plain(sentinel.clone()));
            true
        });
        if inserted {
            info!(container = API_KEY_CONTAINER_NAME, "API key sentinel not found, adding it");
        }
        inserted
    }

    /// Insert the sentinel if missing and persist the API key container
    pub(crate) async fn ensure_api_key_sentinel(&self) -> SecretsResult<()> {
        if !self.insert_api_key_sentinel() {
            return Ok(());
        }
        if self.is_readonly() {
            warn!("Readonly mode, API key sentinel kept in memory only");
            return Ok(());
        }
        self.write_container(API_KEY_CONTAINER_NAME).await
    }
}
