//! Secret entry and container definitions
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


use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Name of a secrets container
pub type ContainerName = String;

/// Contents of one container: secret name -> entry
pub type Container = HashMap<String, SecretEntry>;

/// A value stored under a secret name
///
/// Plain entries serialize as a bare JSON string. Entries created with an
/// explicit admin flag serialize as `{"secret": ..., "isAdmin": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretEntry {
    Plain(String),
    Flagged {
        secret: String,
        #[serde(rename = "isAdmin")]
        is_admin: bool,
    },
}

impl SecretEntry {
    /// Build an entry, flagged only when an admin flag was supplied
    pub fn new(secret: impl Into<String>, is_admin: Option<bool>) -> Self {
        let secret = secret.into();
        match is_admin {
            Some(is_admin) => SecretEntry::Flagged { secret, is_admin },
            None => SecretEntry::Plain(secret),
        }
    }

    /// The secret string, whichever form the entry has
    pub fn secret(&self) -> &str {
        match self {
            SecretEntry::Plain(secret) => secret,
            SecretEntry::Flagged { secret, .. } => secret,
        }
    }

    /// The value when the entry is a plain string
    pub fn as_plain(&self) -> Option<&str> {
        match self {
            SecretEntry::Plain(secret) => Some(secret),
            SecretEntry::Flagged { .. } => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, SecretEntry::Flagged { is_admin: true, .. })
    }
}

impl From<&str> for SecretEntry {
    fn from(secret: &str) -> Self {
        SecretEntry::Plain(secret.to_string())
    }
}

impl From<String> for SecretEntry {
    fn from(secret: String) -> Self {
        SecretEntry::Plain(secret)
    }
}

/// Process-wide service mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Reads and writes are served
    Active,
    /// A container failed to decrypt; nothing is read or written until rotation
    Readonly,
}

/// Shared, mutable [`ServiceMode`]
///
/// Set to readonly by the persistence layer on decrypt failure and back to
/// active only by the rotation protocol.
#[derive(Debug, Default)]
pub struct ModeFlag {
    readonly: AtomicBool,
}

impl ModeFlag {
    pub fn get(&self) -> ServiceMode {
        if self.is_readonly() {
            ServiceMode::Readonly
        } else {
            ServiceMode::Active
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, mode: ServiceMode) {
        self.readonly
            .store(mode == ServiceMode::Readonly, Ordering::SeqCst);
    }
}
