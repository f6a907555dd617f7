use crate::config::SessionCookieConfig;
use crate::cookie::CookieManager;
use crate::crypto::CookieCrypto;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// The set of [`CookieManager`]s in use by an application.
///
/// There is exactly one manager per (cookie name, secret) pair:
/// every session middleware (or typed session kit) built against the same
/// registry with the same cookie name and secret shares it, and therefore
/// resolves the same session id for a given request.
///
/// The registry is meant to be created once, when the application starts,
/// and handed to every component that needs it. Cloning it is cheap.
///
/// # Conflicts
///
/// Two configurations using the same cookie name with different secrets
/// can't coexist: each would reject the cookie encoded by the other.
/// The registry logs an error when that happens. At request time, the conflict
/// surfaces as an internal server error.
#[derive(Debug, Clone, Default)]
pub struct CookieRegistry {
    managers: Arc<Mutex<HashMap<RegistryKey, Arc<CookieManager>>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    cookie_name: String,
    secret_fingerprint: [u8; 32],
}

impl CookieRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the manager for the given cookie configuration and secret,
    /// building it if this is the first time the pair is seen.
    ///
    /// If a manager already exists for the pair, `config` is ignored:
    /// the cookie attributes of the first registration win. A warning is
    /// logged if they differ from `config`.
    pub fn manager(&self, config: &SessionCookieConfig, secret: &SecretString) -> Arc<CookieManager> {
        let key = RegistryKey {
            cookie_name: config.name.clone(),
            secret_fingerprint: Sha256::digest(secret.expose_secret().as_bytes()).into(),
        };
        let mut managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(manager) = managers.get(&key) {
            if manager.config() != config {
                tracing::warn!(
                    cookie.name = %key.cookie_name,
                    registered = ?manager.config(),
                    ignored = ?config,
                    "A session configuration with the same cookie name and secret was already registered, \
                    with different cookie attributes. The attributes of the first registration will be used"
                );
            }
            return Arc::clone(manager);
        }

        if managers
            .keys()
            .any(|other| other.cookie_name == key.cookie_name)
        {
            tracing::error!(
                cookie.name = %key.cookie_name,
                "Two session configurations share the same cookie name but use different secrets. \
                Sessions will fail to load whenever both are used to handle the same request. \
                Either use the same secret or pick a different cookie name"
            );
        }

        let manager = Arc::new(CookieManager::new(
            config.clone(),
            CookieCrypto::new(secret),
        ));
        managers.insert(key, Arc::clone(&manager));
        manager
    }

    /// The number of distinct managers built so far.
    pub fn len(&self) -> usize {
        self.managers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` if no manager has been built yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
