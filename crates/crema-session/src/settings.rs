//! Settings the session manager is built from.

use crate::auth_fsm::RefreshConfig;
use crema_config_and_utils::{Config, CoreResult, DEFAULT_LANGUAGE, DEFAULT_SESSION_EXPIRED_CODE};
use url::Url;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base address every endpoint path is joined onto.
    pub base_url: Url,
    /// Sent as `X-Language`.
    pub language: String,
    /// Business code that marks a session as unrecoverable.
    pub session_expired_code: String,
    pub refresh: RefreshConfig,
}

impl ClientSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            language: DEFAULT_LANGUAGE.to_string(),
            session_expired_code: DEFAULT_SESSION_EXPIRED_CODE.to_string(),
            refresh: RefreshConfig::default(),
        }
    }

    pub fn from_config(config: &Config) -> CoreResult<Self> {
        Ok(Self {
            base_url: config.api_base_url()?,
            language: config.language.clone(),
            session_expired_code: config.session_expired_code.clone(),
            refresh: RefreshConfig::default(),
        })
    }

    pub fn with_refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.api_base_url = "https://staging.crema.app/api/v2".to_string();
        config.language = "en".to_string();

        let settings = ClientSettings::from_config(&config).unwrap();

        assert_eq!(settings.base_url.as_str(), "https://staging.crema.app/api/v2/");
        assert_eq!(settings.language, "en");
        assert_eq!(settings.session_expired_code, DEFAULT_SESSION_EXPIRED_CODE);
        assert_eq!(settings.refresh.max_retries, 3);
    }
}
