pub mod engine;
pub mod factory;
pub mod health;
pub mod openai_compat;
pub mod router;
pub mod traits;

pub use factory::build_backends;
pub use health::{HealthRecord, HealthRegistry, UNHEALTHY_FAILURE_THRESHOLD};
pub use router::{Router, RouterConfig};
pub use traits::Backend;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The fixed executor set. `Main` is the remote full-capability model,
/// `Local` the self-hosted model, and the headless pair are CLI-driven
/// alternatives speaking the same chat-completions protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendId {
    Main,
    Local,
    HeadlessA,
    HeadlessB,
}

impl BackendId {
    pub const ALL: [BackendId; 4] = [
        BackendId::Main,
        BackendId::Local,
        BackendId::HeadlessA,
        BackendId::HeadlessB,
    ];
}

/// Static per-backend configuration. Credentials resolve from env at load
/// time; `max_tokens` is the hard request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub max_tokens: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f64 {
    0.3
}

fn default_top_p() -> f64 {
    0.9
}

fn default_true() -> bool {
    true
}

impl BackendConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_id_round_trips() {
        assert_eq!(BackendId::HeadlessA.to_string(), "headless_a");
        let id: BackendId = "main".parse().unwrap();
        assert_eq!(id, BackendId::Main);
        assert!("claude".parse::<BackendId>().is_err());
    }

    #[test]
    fn config_defaults_fill_in() {
        let config: BackendConfig = toml::from_str(
            r#"
            endpoint = "http://localhost:1234/v1"
            max_tokens = 120000
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 120);
        assert!(config.enabled);
        assert!((config.top_p - 0.9).abs() < f64::EPSILON);
    }
}
