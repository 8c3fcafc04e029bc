//! Bearer credential resolution.
//!
//! Precedence, resolved once per tool call: explicit call parameter, then the
//! token stored by `set_bearer_token`, then `BLOOMEO_BEARER_TOKEN` as read at
//! startup. Concurrent `set` calls are last-writer-wins.

use std::sync::{PoisonError, RwLock};

use crate::error::BloomeoError;

pub const BEARER_TOKEN_ENV: &str = "BLOOMEO_BEARER_TOKEN";

#[derive(Debug, Default)]
pub struct TokenStore {
    stored: RwLock<Option<String>>,
    env_default: Option<String>,
}

fn normalize(token: Option<&str>) -> Option<String> {
    token
        .map(str::trim)
        .map(|t| t.strip_prefix("Bearer ").unwrap_or(t).trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl TokenStore {
    pub fn new(env_default: Option<String>) -> Self {
        Self {
            stored: RwLock::new(None),
            env_default: normalize(env_default.as_deref()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(BEARER_TOKEN_ENV).ok())
    }

    pub fn set(&self, token: &str) -> Result<(), BloomeoError> {
        let token = normalize(Some(token)).ok_or_else(|| {
            BloomeoError::InvalidArgument("bearer_token must not be empty".into())
        })?;
        *self.stored.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(())
    }

    pub fn resolve(&self, explicit: Option<&str>) -> Result<String, BloomeoError> {
        if let Some(token) = normalize(explicit) {
            return Ok(token);
        }
        if let Some(token) = self
            .stored
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(token);
        }
        self.env_default
            .clone()
            .ok_or(BloomeoError::MissingCredential)
    }

    pub fn has_token(&self) -> bool {
        self.resolve(None).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn explicit_beats_stored_beats_env() {
        let store = TokenStore::new(Some("env-token".into()));
        assert_eq!(store.resolve(None).unwrap(), "env-token");

        store.set("stored-token").unwrap();
        assert_eq!(store.resolve(None).unwrap(), "stored-token");
        assert_eq!(store.resolve(Some("call-token")).unwrap(), "call-token");
    }

    #[test]
    fn blank_explicit_token_falls_through() {
        let store = TokenStore::new(Some("env-token".into()));
        assert_eq!(store.resolve(Some("   ")).unwrap(), "env-token");
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        let store = TokenStore::new(None);
        store.set("Bearer abc123").unwrap();
        assert_eq!(store.resolve(None).unwrap(), "abc123");
    }

    #[test]
    fn missing_everywhere_is_missing_credential() {
        let store = TokenStore::new(Some("  ".into()));
        let err = store.resolve(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
        assert!(!store.has_token());
    }

    #[test]
    fn set_rejects_empty_token() {
        let store = TokenStore::new(None);
        let err = store.set("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
