use docpush_core::backend::DEFAULT_API_URL;
use docpush_core::{Credential, DEFAULT_FALLBACK_REF};

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the contents API
    pub api_url: String,
    /// Token sent with every request, if any
    pub credential: Option<Credential>,
    /// Ref to read from when the requested branch does not exist
    pub fallback_ref: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `DOCPUSH_API_URL`: API base URL (default `https://api.github.com`)
    /// - `GITHUB_TOKEN`: token used to authenticate
    /// - `DOCPUSH_FALLBACK_REF`: read fallback ref (default `master`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let set = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            api_url: set("DOCPUSH_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            credential: Credential::from_optional(set("GITHUB_TOKEN")),
            fallback_ref: set("DOCPUSH_FALLBACK_REF")
                .unwrap_or_else(|| DEFAULT_FALLBACK_REF.to_string()),
        };
        config.validate()
    }

    /// Apply command-line values on top of the environment.
    pub fn with_overrides(
        mut self,
        api_url: Option<String>,
        token: Option<String>,
        fallback_ref: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(api_url) = api_url {
            self.api_url = api_url;
        }
        if let Some(credential) = Credential::from_optional(token) {
            self.credential = Some(credential);
        }
        if let Some(fallback_ref) = fallback_ref {
            self.fallback_ref = fallback_ref;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let api_url = self.api_url.trim();
        if !(api_url.starts_with("https://") || api_url.starts_with("http://")) {
            return Err(ConfigError::InvalidApiUrl(self.api_url));
        }
        if self.fallback_ref.trim().is_empty() {
            return Err(ConfigError::EmptyFallbackRef);
        }
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API URL must start with http:// or https://, got {0:?}")]
    InvalidApiUrl(String),

    #[error("Fallback ref must not be empty")]
    EmptyFallbackRef,
}
