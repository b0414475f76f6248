//! Process-wide configuration, loaded once from the environment at
//! startup and handed around as `Arc<AppConfig>` from then on.

use std::sync::Arc;

use crate::limits::EngineLimits;

/// Which screenshot a task keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotPolicy {
    /// Capture only once, after the final verification.
    FinalOnly,
    /// Capture after every step.
    EveryStep,
}

impl ScreenshotPolicy {
    fn from_env_str(raw: &str) -> Self {
        match raw {
            "every_step" => ScreenshotPolicy::EveryStep,
            _ => ScreenshotPolicy::FinalOnly,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub model_name: String,
    pub port: u16,
    pub limits: EngineLimits,
    pub screenshot_policy: ScreenshotPolicy,
}

impl AppConfig {
    /// Builds the config from the environment. Fails fast if
    /// `OPENAI_API_KEY` is absent; everything else has a default.
    pub fn from_env() -> anyhow::Result<Arc<Self>> {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;

        let model_name = std::env::var("MODEL_NAME").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let screenshot_policy = std::env::var("SCREENSHOT_POLICY")
            .map(|raw| ScreenshotPolicy::from_env_str(&raw))
            .unwrap_or(ScreenshotPolicy::FinalOnly);

        Ok(Arc::new(Self {
            openai_api_key,
            model_name,
            port,
            limits: EngineLimits::from_env(),
            screenshot_policy,
        }))
    }
}

impl std::fmt::Display for AppConfig {
    /// Never prints `openai_api_key` — used for startup logging.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AppConfig {{ model_name: {}, port: {}, max_steps: {}, max_retries: {}, screenshot_policy: {:?} }}",
            self.model_name, self.port, self.limits.max_steps, self.limits.max_retries, self.screenshot_policy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_fails_fast() {
        std::env::remove_var("OPENAI_API_KEY");
        let result = AppConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn defaults_apply_when_only_api_key_is_set() {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        std::env::remove_var("PORT");
        std::env::remove_var("MODEL_NAME");
        std::env::remove_var("SCREENSHOT_POLICY");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.model_name, "gpt-4o-mini");
        assert_eq!(config.screenshot_policy, ScreenshotPolicy::FinalOnly);
        std::env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn display_never_prints_api_key() {
        std::env::set_var("OPENAI_API_KEY", "super-secret-value");
        let config = AppConfig::from_env().unwrap();
        let rendered = format!("{}", config);
        assert!(!rendered.contains("super-secret-value"));
        std::env::remove_var("OPENAI_API_KEY");
    }
}
