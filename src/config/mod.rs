//! Configuration.
//!
//! A small TOML file under the platform config dir, with environment
//! variables layered on top. Env always wins; a missing file just means
//! defaults.

use crate::backend::router::RouterConfig;
use crate::backend::BackendConfig;
use crate::delegation::ExecutionMode;
use crate::error::ConfigError;
use crate::orchestrator::{BalanceStrategy, OrchestratorConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub main: BackendConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<BackendConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless_a: Option<BackendConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless_b: Option<BackendConfig>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            main: BackendConfig {
                endpoint: "http://localhost:8765".to_string(),
                model: String::new(),
                api_key: None,
                max_tokens: 200_000,
                timeout_secs: 120,
                temperature: 0.3,
                top_p: 0.9,
                enabled: true,
            },
            local: Some(BackendConfig {
                endpoint: "http://localhost:1234/v1".to_string(),
                model: "auto".to_string(),
                api_key: None,
                max_tokens: 120_000,
                timeout_secs: 120,
                temperature: 0.3,
                top_p: 0.9,
                enabled: true,
            }),
            headless_a: None,
            headless_b: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrinitasConfig {
    pub mode: ExecutionMode,
    pub backends: BackendsConfig,
    pub router: RouterConfig,
    pub orchestrator: OrchestratorConfig,
}

impl TrinitasConfig {
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "trinitas")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the config file when present, then apply env overrides.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path)?;
                toml::from_str(&raw)
                    .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("LOCAL_LLM_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.local_mut().endpoint = endpoint;
        }

        if let Ok(model) = std::env::var("LOCAL_LLM_MODEL")
            && !model.is_empty()
        {
            self.local_mut().model = model;
        }

        if let Ok(key) = std::env::var("LOCAL_LLM_API_KEY")
            && !key.is_empty()
        {
            self.local_mut().api_key = Some(key);
        }

        if let Ok(endpoint) = std::env::var("MAIN_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.backends.main.endpoint = endpoint;
        }

        if let Ok(key) = std::env::var("MAIN_API_KEY")
            && !key.is_empty()
        {
            self.backends.main.api_key = Some(key);
        }

        if let Ok(raw) = std::env::var("TRINITAS_MODE")
            && !raw.trim().is_empty()
        {
            match raw.trim().parse::<ExecutionMode>() {
                Ok(mode) => self.mode = mode,
                Err(_) => {
                    tracing::warn!(value = raw.as_str(), "invalid TRINITAS_MODE ignored");
                }
            }
        }

        if let Ok(min_pool) = std::env::var("ORCHESTRATOR_MIN_POOL")
            && let Ok(min_pool) = min_pool.parse::<usize>()
        {
            self.orchestrator.min_pool = min_pool;
        }

        if let Ok(max_pool) = std::env::var("ORCHESTRATOR_MAX_POOL")
            && let Ok(max_pool) = max_pool.parse::<usize>()
        {
            self.orchestrator.max_pool = max_pool;
        }

        if let Ok(max_workers) = std::env::var("ORCHESTRATOR_MAX_WORKERS")
            && let Ok(max_workers) = max_workers.parse::<usize>()
        {
            self.orchestrator.max_workers = max_workers;
        }

        if let Ok(strategy) = std::env::var("LOAD_STRATEGY")
            && let Ok(strategy) = strategy.trim().parse::<BalanceStrategy>()
        {
            self.orchestrator.strategy = strategy;
        }
    }

    fn local_mut(&mut self) -> &mut BackendConfig {
        self.backends
            .local
            .get_or_insert_with(|| BackendsConfig::default().local.expect("default local"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_pool < self.orchestrator.min_pool {
            return Err(ConfigError::Validation(format!(
                "max_pool ({}) must be >= min_pool ({})",
                self.orchestrator.max_pool, self.orchestrator.min_pool
            )));
        }
        if self.backends.main.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "main backend max_tokens must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Env vars are process-global; keep these tests serialized.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "LOCAL_LLM_ENDPOINT",
            "LOCAL_LLM_MODEL",
            "LOCAL_LLM_API_KEY",
            "MAIN_ENDPOINT",
            "MAIN_API_KEY",
            "TRINITAS_MODE",
            "ORCHESTRATOR_MIN_POOL",
            "ORCHESTRATOR_MAX_POOL",
            "ORCHESTRATOR_MAX_WORKERS",
            "LOAD_STRATEGY",
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn defaults_are_sane() {
        let config = TrinitasConfig::default();
        assert_eq!(config.backends.main.max_tokens, 200_000);
        assert_eq!(config.backends.local.as_ref().unwrap().max_tokens, 120_000);
        assert!(config.backends.headless_a.is_none());
        assert_eq!(config.orchestrator.min_pool, 5);
        assert_eq!(config.mode, ExecutionMode::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_win() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_env();
        unsafe {
            std::env::set_var("LOCAL_LLM_ENDPOINT", "http://gpu-box:9001/v1");
            std::env::set_var("LOCAL_LLM_MODEL", "gpt-oss-120b");
            std::env::set_var("MAIN_API_KEY", "mk-123");
            std::env::set_var("TRINITAS_MODE", "hybrid");
            std::env::set_var("ORCHESTRATOR_MIN_POOL", "2");
            std::env::set_var("ORCHESTRATOR_MAX_POOL", "8");
            std::env::set_var("LOAD_STRATEGY", "least_load");
        }

        let mut config = TrinitasConfig::default();
        config.apply_env_overrides();
        clear_env();

        let local = config.backends.local.as_ref().unwrap();
        assert_eq!(local.endpoint, "http://gpu-box:9001/v1");
        assert_eq!(local.model, "gpt-oss-120b");
        assert_eq!(config.backends.main.api_key.as_deref(), Some("mk-123"));
        assert_eq!(config.mode, ExecutionMode::Hybrid);
        assert_eq!(config.orchestrator.min_pool, 2);
        assert_eq!(config.orchestrator.max_pool, 8);
        assert_eq!(config.orchestrator.strategy, BalanceStrategy::LeastLoad);
    }

    #[test]
    fn invalid_mode_env_is_ignored() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_env();
        unsafe { std::env::set_var("TRINITAS_MODE", "warp-speed") };
        let mut config = TrinitasConfig::default();
        config.apply_env_overrides();
        clear_env();
        assert_eq!(config.mode, ExecutionMode::Auto);
    }

    #[test]
    fn toml_round_trip() {
        let config = TrinitasConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let back: TrinitasConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.backends.main.endpoint, config.backends.main.endpoint);
        assert_eq!(back.orchestrator.max_pool, config.orchestrator.max_pool);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: TrinitasConfig = toml::from_str(
            r#"
            [backends.main]
            endpoint = "https://engine.internal"
            max_tokens = 180000

            [orchestrator]
            min_pool = 1
            max_pool = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.backends.main.endpoint, "https://engine.internal");
        assert_eq!(config.orchestrator.max_pool, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.router.max_attempts, 3);
        assert!(config.backends.local.is_some());
    }

    #[test]
    fn pool_bounds_validated() {
        let mut config = TrinitasConfig::default();
        config.orchestrator.min_pool = 10;
        config.orchestrator.max_pool = 2;
        assert!(config.validate().is_err());
    }
}
