//! Error types for the secrets service
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


use thiserror::Error;

/// Error code reported for missing secrets
pub const NOT_FOUND_CODE: u16 = 404;

/// Error code reported while the service refuses to read or write secrets
pub const READONLY_CODE: u16 = 555;

/// Error code for everything else
pub const INTERNAL_CODE: u16 = 500;

/// Secrets service errors
#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Secret {name} not found in container {container}")]
    NotFound { container: String, name: String },

    #[error("Secrets Service is in readonly mode")]
    Readonly,

    #[error("Failed to decrypt secrets container {0}")]
    DecryptFailed(String),

    #[error("Failed to parse secrets container {0}")]
    ParseFailed(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SecretsError {
    /// Numeric class of the error, as reported to API callers
    pub fn code(&self) -> u16 {
        match self {
            SecretsError::NotFound { .. } => NOT_FOUND_CODE,
            SecretsError::Readonly
            | SecretsError::DecryptFailed(_)
            | SecretsError::ParseFailed(_) => READONLY_CODE,
            _ => INTERNAL_CODE,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == NOT_FOUND_CODE
    }

    pub(crate) fn not_found(container: &str, name: &str) -> Self {
        SecretsError::NotFound {
            container: container.to_string(),
            name: name.to_string(),
        }
    }
}

impl From<strongbox_config::SettingsError> for SecretsError {
    fn from(e: strongbox_config::SettingsError) -> Self {
        SecretsError::Configuration(e.to_string())
    }
}

/// Result type for secrets operations
pub type SecretsResult<T> = Result<T, SecretsError>;
