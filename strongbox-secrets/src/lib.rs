//! Local encrypted secrets storage for Strongbox
//!
//! Secrets are grouped into named containers; each container is stored as a
//! single encrypted file. Includes API key issuance/validation and recovery
//! from a key change through dual-key rotation.
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


pub mod api_keys;
pub mod cipher;
pub mod encryption;
pub mod entry;
pub mod error;
pub mod lock;
pub mod persistence;
pub mod rotation;
pub mod service;
pub mod store;

pub use cipher::{Aes256GcmCipher, Cipher};
pub use encryption::{EncryptionAdapter, EncryptionKeySet};
pub use entry::{Container, SecretEntry, ServiceMode};
pub use error::{SecretsError, SecretsResult};
pub use lock::{ExpiringLock, FileLock, LockToken};
pub use rotation::RotationOutcome;
pub use service::{SecretsService, API_KEY_CONTAINER_NAME, DEFAULT_CONTAINER_NAME};
