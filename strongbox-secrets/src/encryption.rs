//! Encryption key selection for container files
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


use crate::cipher::Cipher;
use crate::error::{SecretsError, SecretsResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

/// Maximum number of configured keys: the write key and the previous key
pub const MAX_KEYS: usize = 2;

/// Ordered encryption keys read from configuration
///
/// Position 0 is the current write key, position 1 (optional) the previous
/// key, kept only while data written under it is being rotated.
#[derive(Debug, Clone)]
pub struct EncryptionKeySet {
    raw: String,
    keys: Vec<String>,
}

impl EncryptionKeySet {
    /// Parse a comma-separated list of base64 keys
    pub fn parse(raw: &str) -> SecretsResult<Self> {
        let mut keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();

        if keys.is_empty() {
            return Err(SecretsError::Configuration(
                "No encryption key configured".to_string(),
            ));
        }
        if keys.len() > MAX_KEYS {
            warn!(
                configured = keys.len(),
                "More than {} encryption keys configured, ignoring the extra ones", MAX_KEYS
            );
            keys.truncate(MAX_KEYS);
        }

        Ok(Self {
            raw: raw.to_string(),
            keys,
        })
    }

    /// Key used for every write
    pub fn write_key(&self) -> &str {
        &self.keys[0]
    }

    /// Key that was active before the current one, if configured
    pub fn previous_key(&self) -> Option<&str> {
        self.keys.get(1).map(String::as_str)
    }

    /// True when a previous key is configured next to the write key
    pub fn has_previous_key(&self) -> bool {
        self.keys.len() == MAX_KEYS
    }

    /// Base64 SHA-256 of the configured key material, exactly as configured
    pub fn material_hash(&self) -> String {
        BASE64.encode(Sha256::digest(self.raw.as_bytes()))
    }
}

/// Wraps a [`Cipher`] with the key selection rules of the service
///
/// Writes always use the write key. Reads use the active read key, which
/// only the rotation protocol moves away from the write key.
pub struct EncryptionAdapter {
    cipher: Arc<dyn Cipher>,
    keys: EncryptionKeySet,
    active_read_key: RwLock<String>,
    decoded_keys: Mutex<HashMap<String, Vec<u8>>>,
}

impl EncryptionAdapter {
    pub fn new(cipher: Arc<dyn Cipher>, keys: EncryptionKeySet) -> Self {
        let active_read_key = RwLock::new(keys.write_key().to_string());
        Self {
            cipher,
            keys,
            active_read_key,
            decoded_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn keys(&self) -> &EncryptionKeySet {
        &self.keys
    }

    /// Encrypt under the write key
    pub fn encrypt(&self, plaintext: &[u8]) -> SecretsResult<Vec<u8>> {
        let key = self.decode_key(self.keys.write_key())?;
        self.cipher.encrypt(plaintext, &key)
    }

    /// Decrypt under the active read key
    pub fn decrypt(&self, ciphertext: &[u8]) -> SecretsResult<Vec<u8>> {
        let key = self.decode_key(&self.active_read_key())?;
        self.cipher.decrypt(ciphertext, &key)
    }

    pub fn active_read_key(&self) -> String {
        self.active_read_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point reads at the previous key. Returns false when none is configured.
    pub fn read_with_previous_key(&self) -> bool {
        match self.keys.previous_key() {
            Some(previous) => {
                self.set_active_read_key(previous);
                true
            }
            None => false,
        }
    }

    /// Point reads back at the write key
    pub fn read_with_write_key(&self) {
        self.set_active_read_key(self.keys.write_key());
    }

    fn set_active_read_key(&self, key: &str) {
        let mut active = self
            .active_read_key
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *active = key.to_string();
    }

    /// Decode a base64 key to raw bytes, once per key value
    fn decode_key(&self, key: &str) -> SecretsResult<Vec<u8>> {
        let mut decoded = self
            .decoded_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(bytes) = decoded.get(key) {
            return Ok(bytes.clone());
        }

        let bytes = BASE64
            .decode(key)
            .map_err(|e| SecretsError::InvalidKey(format!("Key is not valid base64: {}", e)))?;
        debug!(cached_keys = decoded.len() + 1, "Decoded encryption key");
        decoded.insert(key.to_string(), bytes.clone());
        Ok(bytes)
    }
}
