use std::time::Duration;

use crate::errors::ClientError;

const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runtime configuration of the chat client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the conversation backend, without trailing slash.
    pub backend_url: String,
    /// Credential sent in the `Authorization` header. `None` means logged out.
    pub auth_token: Option<String>,
    /// Base path bare-string source documents are resolved against.
    pub source_base_url: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("backend_url", &self.backend_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("source_base_url", &self.source_base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        let backend_url = backend_url.into().trim_end_matches('/').to_string();
        Self {
            source_base_url: format!("{backend_url}/media"),
            backend_url,
            auth_token: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Reads `SIGMA_*` variables from the process environment.
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let mut config =
            Self::new(
                lookup("SIGMA_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            );

        config.auth_token = lookup("SIGMA_AUTH_TOKEN").filter(|t| !t.trim().is_empty());

        if let Some(base) = lookup("SIGMA_SOURCE_BASE_URL") {
            config.source_base_url = base.trim_end_matches('/').to_string();
        }

        if let Some(raw) = lookup("SIGMA_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| {
                    ClientError::Config(format!("SIGMA_HTTP_TIMEOUT_SECS is not a number: {raw}"))
                })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert_eq!(config.source_base_url, "http://localhost:8000/media");
        assert!(config.auth_token.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn variables_override_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SIGMA_BACKEND_URL", "https://chat.example.com/"),
            ("SIGMA_AUTH_TOKEN", "Token abc"),
            ("SIGMA_SOURCE_BASE_URL", "https://docs.example.com/files/"),
            ("SIGMA_HTTP_TIMEOUT_SECS", "15"),
        ]))
        .unwrap();
        assert_eq!(config.backend_url, "https://chat.example.com");
        assert_eq!(config.auth_token.as_deref(), Some("Token abc"));
        assert_eq!(config.source_base_url, "https://docs.example.com/files");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn blank_token_means_logged_out() {
        let config = ClientConfig::from_lookup(lookup(&[("SIGMA_AUTH_TOKEN", "  ")])).unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn bad_timeout_is_a_config_error() {
        let err = ClientConfig::from_lookup(lookup(&[("SIGMA_HTTP_TIMEOUT_SECS", "soon")]))
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn debug_output_hides_the_token() {
        let config = ClientConfig::new("http://x").with_token("secret");
        assert!(!format!("{config:?}").contains("secret"));
    }
}
