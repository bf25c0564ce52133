//! In-memory container cache
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


use crate::entry::{Container, ContainerName, SecretEntry};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Container name -> secrets, consulted by synchronous reads
///
/// Guards are never held across an await point.
#[derive(Debug, Default)]
pub struct ContainerStore {
    containers: RwLock<HashMap<ContainerName, Container>>,
}

impl ContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ContainerName, Container>> {
        self.containers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ContainerName, Container>> {
        self.containers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the cached copy of a container
    pub fn replace(&self, name: &str, container: Container) {
        self.write().insert(name.to_string(), container);
    }

    /// Mutate a container, creating it empty first if it was never seen
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut Container) -> R) -> R {
        let mut containers = self.write();
        let container = containers.entry(name.to_string()).or_insert_with(|| {
            info!(container = name, "Initializing secrets container");
            Container::new()
        });
        f(container)
    }

    /// Copy of a container, creating it empty first if it was never seen
    pub fn get_or_init(&self, name: &str) -> Container {
        if let Some(container) = self.read().get(name) {
            return container.clone();
        }
        self.update(name, |container| container.clone())
    }

    /// One entry of a container, creating the container empty if it was never seen
    pub fn entry(&self, name: &str, secret_name: &str) -> Option<SecretEntry> {
        if let Some(container) = self.read().get(name) {
            return container.get(secret_name).cloned();
        }
        self.update(name, |container| container.get(secret_name).cloned())
    }

    /// Copy of a container only if it is cached
    pub fn snapshot(&self, name: &str) -> Option<Container> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Names of the cached containers
    pub fn names(&self) -> Vec<ContainerName> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_container_is_initialized_empty() {
        let store = ContainerStore::new();
        assert!(store.is_empty());

        assert_eq!(store.entry("default", "userA"), None);
        assert!(store.contains("default"));
        assert!(store.get_or_init("other").is_empty());
        assert_eq!(store.names(), vec!["default".to_string(), "other".to_string()]);
    }

    #[test]
    fn test_replace_and_update() {
        let store = ContainerStore::new();
        let mut container = Container::new();
        container.insert("userA".into(), SecretEntry::from("pw1"));
        store.replace("default", container);

        let removed = store.update("default", |c| c.remove("userA"));
        assert_eq!(removed, Some(SecretEntry::from("pw1")));
        assert_eq!(store.snapshot("default"), Some(Container::new()));
        assert_eq!(store.snapshot("missing"), None);
        assert_eq!(store.len(), 1);
    }
}
