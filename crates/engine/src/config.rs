use std::path::PathBuf;
use std::time::Duration;

/// Wizard configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a
/// backend on `localhost:3000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardConfig {
    /// Base URL of the REST API, including the version prefix.
    pub api_url: String,
    /// Bearer token sent with every request, when set.
    pub api_token: Option<String>,
    /// Bound on each outbound request.
    pub request_timeout: Duration,
    /// Delay between the last keystroke and a uniqueness lookup.
    pub validation_debounce: Duration,
    /// Delay between the last edit and a background save.
    pub autosave_debounce: Duration,
    /// Directory holding the persisted session.
    pub session_store_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api/v1".into(),
            api_token: None,
            request_timeout: Duration::from_secs(10),
            validation_debounce: Duration::from_millis(600),
            autosave_debounce: Duration::from_millis(2000),
            session_store_dir: PathBuf::from(".onboarding"),
        }
    }
}

impl WizardConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                        |
    /// |--------------------------|--------------------------------|
    /// | `ONBOARDING_API_URL`     | `http://localhost:3000/api/v1` |
    /// | `ONBOARDING_API_TOKEN`   | unset                          |
    /// | `REQUEST_TIMEOUT_SECS`   | `10`                           |
    /// | `VALIDATION_DEBOUNCE_MS` | `600`                          |
    /// | `AUTOSAVE_DEBOUNCE_MS`   | `2000`                         |
    /// | `SESSION_STORE_DIR`      | `.onboarding`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_url = var("ONBOARDING_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);

        let request_timeout = match var("REQUEST_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_positive("REQUEST_TIMEOUT_SECS", &v)?),
            None => defaults.request_timeout,
        };
        let validation_debounce = match var("VALIDATION_DEBOUNCE_MS") {
            Some(v) => Duration::from_millis(parse_u64("VALIDATION_DEBOUNCE_MS", &v)?),
            None => defaults.validation_debounce,
        };
        let autosave_debounce = match var("AUTOSAVE_DEBOUNCE_MS") {
            Some(v) => Duration::from_millis(parse_u64("AUTOSAVE_DEBOUNCE_MS", &v)?),
            None => defaults.autosave_debounce,
        };

        Ok(Self {
            api_url,
            api_token: var("ONBOARDING_API_TOKEN"),
            request_timeout,
            validation_debounce,
            autosave_debounce,
            session_store_dir: var("SESSION_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_store_dir),
        })
    }
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match parse_u64(var, value)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            expected: "a positive integer",
        }),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WizardConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WizardConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, WizardConfig::default());
        assert_eq!(config.api_url, "http://localhost:3000/api/v1");
        assert_eq!(config.validation_debounce, Duration::from_millis(600));
        assert_eq!(config.autosave_debounce, Duration::from_secs(2));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("ONBOARDING_API_URL", "https://api.example/v2/"),
            ("ONBOARDING_API_TOKEN", "secret"),
            ("REQUEST_TIMEOUT_SECS", "3"),
            ("VALIDATION_DEBOUNCE_MS", "250"),
            ("AUTOSAVE_DEBOUNCE_MS", "0"),
            ("SESSION_STORE_DIR", "/tmp/onboarding"),
        ])
        .unwrap();
        assert_eq!(config.api_url, "https://api.example/v2");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.validation_debounce, Duration::from_millis(250));
        assert_eq!(config.autosave_debounce, Duration::ZERO);
        assert_eq!(config.session_store_dir, PathBuf::from("/tmp/onboarding"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("ONBOARDING_API_TOKEN", "  "), ("REQUEST_TIMEOUT_SECS", "")]).unwrap();
        assert!(config.api_token.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&[("VALIDATION_DEBOUNCE_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("VALIDATION_DEBOUNCE_MS"));

        assert!(load(&[("REQUEST_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("AUTOSAVE_DEBOUNCE_MS", "-5")]).is_err());
    }
}
