//! Credential adapters.

use std::sync::RwLock;

use crate::ports::CredentialPort;

/// Credential held in memory and swapped by the hosting session on login and
/// logout.
#[derive(Debug, Default)]
pub struct SessionCredential {
    value: RwLock<Option<String>>,
}

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: RwLock::new(Some(value.into())),
        }
    }

    /// No credential yet; the feed stays idle until one is set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, value: impl Into<String>) {
        *self
            .value
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(value.into());
    }

    pub fn clear(&self) {
        *self
            .value
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

impl CredentialPort for SessionCredential {
    fn credential(&self) -> Option<String> {
        self.value
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// Reads the credential from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialPort for EnvCredential {
    fn credential(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}
