//! API key lookup and the optional interactive key-selection capability.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::constants::API_KEY_VARS;

/// Supplies the API key at call time. Implementations must not cache a key
/// that could have changed since the last call.
pub trait ApiKeySource: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// Reads the key from the process environment on every call.
#[derive(Debug, Clone)]
pub struct EnvApiKey {
    vars: Vec<String>,
}

impl EnvApiKey {
    pub fn new() -> Self {
        Self::from_vars(API_KEY_VARS.iter().copied())
    }

    pub fn from_vars<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for EnvApiKey {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeySource for EnvApiKey {
    fn api_key(&self) -> Option<String> {
        self.vars
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|key| !key.trim().is_empty())
    }
}

/// A key that can be replaced at runtime, e.g. by a selection prompt.
/// Falls back to `fallback` while nothing has been selected.
#[derive(Clone)]
pub struct SharedApiKey {
    selected: Arc<RwLock<Option<String>>>,
    fallback: Arc<dyn ApiKeySource>,
}

impl SharedApiKey {
    pub fn new(fallback: Arc<dyn ApiKeySource>) -> Self {
        Self {
            selected: Arc::new(RwLock::new(None)),
            fallback,
        }
    }

    pub fn select(&self, key: impl Into<String>) {
        let key = key.into();
        let mut selected = self.selected.write().unwrap_or_else(PoisonError::into_inner);
        *selected = Some(key.trim().to_string()).filter(|k| !k.is_empty());
    }

    pub fn is_selected(&self) -> bool {
        self.api_key().is_some()
    }
}

impl ApiKeySource for SharedApiKey {
    fn api_key(&self) -> Option<String> {
        let selected = self
            .selected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        selected.or_else(|| self.fallback.api_key())
    }
}

/// Host capability that lets the user pick an API key interactively.
#[async_trait]
pub trait CredentialManager: Send + Sync {
    async fn has_selected_credential(&self) -> bool;
    /// Run the selection flow. Callers proceed whatever the outcome; a bad
    /// selection surfaces as a failure of the next remote call.
    async fn prompt_select_credential(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    impl ApiKeySource for Fixed {
        fn api_key(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn test_env_key_is_read_on_every_call() {
        let var = "FITSTREAM_TEST_KEY_REREAD";
        let source = EnvApiKey::from_vars([var]);
        std::env::remove_var(var);
        assert_eq!(source.api_key(), None);

        std::env::set_var(var, "first");
        assert_eq!(source.api_key().as_deref(), Some("first"));

        std::env::set_var(var, "second");
        assert_eq!(source.api_key().as_deref(), Some("second"));
        std::env::remove_var(var);
    }

    #[test]
    fn test_env_key_skips_blank_values() {
        let blank = "FITSTREAM_TEST_KEY_BLANK";
        let real = "FITSTREAM_TEST_KEY_REAL";
        std::env::set_var(blank, "   ");
        std::env::set_var(real, "k");
        let source = EnvApiKey::from_vars([blank, real]);
        assert_eq!(source.api_key().as_deref(), Some("k"));
        std::env::remove_var(blank);
        std::env::remove_var(real);
    }

    #[test]
    fn test_shared_key_prefers_selection() {
        let shared = SharedApiKey::new(Arc::new(Fixed(Some("env"))));
        assert_eq!(shared.api_key().as_deref(), Some("env"));

        shared.select("  picked ");
        assert_eq!(shared.api_key().as_deref(), Some("picked"));

        shared.select("");
        assert_eq!(shared.api_key().as_deref(), Some("env"));
    }

    #[test]
    fn test_shared_key_without_fallback() {
        let shared = SharedApiKey::new(Arc::new(Fixed(None)));
        assert!(!shared.is_selected());
        shared.select("abc");
        assert!(shared.is_selected());
    }
}
