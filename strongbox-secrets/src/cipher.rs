//! Cipher interface used to encrypt containers at rest
//!
//! The service only depends on the [`Cipher`] trait, so the algorithm can be
//! swapped without touching the persistence code:
//! - AES-256-GCM (default, [`Aes256GcmCipher`])
//! - deterministic fakes in tests
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
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};

/// Size of the AES-GCM nonce prepended to every ciphertext
pub const NONCE_LEN: usize = 12;

/// Size of an AES-256 key
pub const KEY_LEN: usize = 32;

/// Symmetric cipher parameterized by raw key bytes
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext` under `key`
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> SecretsResult<Vec<u8>>;

    /// Decrypt `ciphertext` under `key`, failing when the key does not match
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> SecretsResult<Vec<u8>>;
}

/// AES-256-GCM with a random nonce stored in front of the ciphertext
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes256GcmCipher;

impl Aes256GcmCipher {
    fn cipher(key: &[u8]) -> SecretsResult<Aes256Gcm> {
        if key.len() != KEY_LEN {
            return Err(SecretsError::InvalidKey(format!(
                "Key must be exactly {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
    }
}

impl Cipher for Aes256GcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> SecretsResult<Vec<u8>> {
        let cipher = Self::cipher(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| SecretsError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> SecretsResult<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(SecretsError::Encryption("Encrypted data too short".to_string()));
        }

        let cipher = Self::cipher(key)?;
        let (nonce_bytes, ciphertext) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretsError::Encryption(format!("Decryption failed: {}", e)))
    }
}
