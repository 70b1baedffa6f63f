//! Where the model gateway gets its API key from.

use std::collections::HashMap;
use std::sync::RwLock;

/// Key-value lookup for secrets. Blank values count as absent.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().and_then(non_blank)
    }
}

/// In-memory credentials, settable at runtime.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned())
            .and_then(non_blank)
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_treats_blank_as_missing() {
        let store = MemoryCredentialStore::new().with("KEY", "   ");
        assert_eq!(store.get("KEY"), None);

        store.set("KEY", "secret");
        assert_eq!(store.get("KEY").as_deref(), Some("secret"));

        store.remove("KEY");
        assert_eq!(store.get("KEY"), None);
    }

    #[test]
    fn env_store_misses_unset_variables() {
        assert_eq!(
            EnvCredentialStore.get("TOOLCHAT_TEST_SURELY_UNSET_VARIABLE"),
            None
        );
    }
}
