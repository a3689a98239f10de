//! Persisted language preference. Stored as a raw string under the
//! `userLanguage` key, read once at startup, with no expiry; only an
//! explicit user action changes it.

use std::sync::Arc;

use log::info;

use crate::cache::{CacheStore, LANGUAGE_KEY};

pub const DEFAULT_LANGUAGE: &str = "en";

pub struct LanguagePreference {
    store: Arc<dyn CacheStore>,
}

impl LanguagePreference {
    /// Loads the stored code, writing the default back when nothing (or
    /// an empty string) is stored yet.
    pub fn load(store: Arc<dyn CacheStore>) -> (Self, String) {
        let code = match store.get(LANGUAGE_KEY) {
            Some(code) if !code.is_empty() => code,
            _ => {
                store.set(LANGUAGE_KEY, DEFAULT_LANGUAGE.into());
                DEFAULT_LANGUAGE.to_string()
            }
        };
        info!("language preference: {code}");
        (Self { store }, code)
    }

    pub fn current(&self) -> String {
        self.store
            .get(LANGUAGE_KEY)
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }

    pub fn update(&self, code: &str) {
        self.store.set(LANGUAGE_KEY, code.to_string());
    }
}
