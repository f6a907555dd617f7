use crate::SessionConfig;
use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use std::path::Path;

/// The prefix for environment variables that override configuration values.
///
/// Nested keys are separated by a double underscore, e.g.
/// `SESSION_COOKIE__MAX_AGE=30m` overrides `cookie.max_age`.
pub(crate) const ENV_PREFIX: &str = "SESSION_";

impl SessionConfig {
    /// Load the session configuration from an (optional) YAML file,
    /// with overrides taken from `SESSION_`-prefixed environment variables.
    ///
    /// Environment variables take precedence over the file.
    /// `SESSION_SECRET` is always taken verbatim, even if it looks like
    /// a number or a boolean.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["secret"]));
        if let Some(secret) = Env::var(&format!("{ENV_PREFIX}SECRET")) {
            figment = figment.merge(Serialized::default("secret", secret));
        }
        figment
            .extract()
            .context("Failed to load the session configuration")
            .map_err(ConfigLoadError)
    }
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
/// The error returned by [`SessionConfig::load`].
pub struct ConfigLoadError(anyhow::Error);
