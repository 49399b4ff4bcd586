//! Advisory load balancing across orchestrator peers.
//!
//! The orchestrator never moves traffic itself; `select_instance` is a hint
//! for an external front door.

use crate::session::{SessionConfig, priority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BalanceStrategy {
    #[default]
    LeastConnections,
    LeastLoad,
    PriorityAware,
    RoundRobin,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InstanceStats {
    pub connections: u64,
    pub load: f64,
}

pub struct LoadBalancer {
    instances: Vec<String>,
    strategy: BalanceStrategy,
    stats: Mutex<HashMap<String, InstanceStats>>,
}

impl LoadBalancer {
    pub fn new(instances: Vec<String>, strategy: BalanceStrategy) -> Self {
        let instances = if instances.is_empty() {
            vec!["local".to_string()]
        } else {
            instances
        };
        let stats = instances
            .iter()
            .map(|instance| (instance.clone(), InstanceStats::default()))
            .collect();
        Self {
            instances,
            strategy,
            stats: Mutex::new(stats),
        }
    }

    pub fn update_stats(&self, instance: &str, connections: u64, load: f64) {
        let mut stats = self.stats.lock().expect("balancer lock poisoned");
        if let Some(entry) = stats.get_mut(instance) {
            *entry = InstanceStats { connections, load };
        }
    }

    pub fn stats(&self) -> HashMap<String, InstanceStats> {
        self.stats.lock().expect("balancer lock poisoned").clone()
    }

    /// Pick a target instance for a new session.
    pub fn select_instance(&self, config: &SessionConfig) -> String {
        let stats = self.stats.lock().expect("balancer lock poisoned");

        let least_connections = || {
            self.instances
                .iter()
                .min_by_key(|i| stats.get(*i).map_or(0, |s| s.connections))
                .cloned()
        };
        let least_load = || {
            self.instances
                .iter()
                .min_by(|a, b| {
                    let la = stats.get(*a).map_or(0.0, |s| s.load);
                    let lb = stats.get(*b).map_or(0.0, |s| s.load);
                    la.total_cmp(&lb)
                })
                .cloned()
        };

        let selected = match self.strategy {
            BalanceStrategy::LeastConnections => least_connections(),
            BalanceStrategy::LeastLoad => least_load(),
            BalanceStrategy::PriorityAware => {
                if config.priority >= priority::HIGH {
                    least_load()
                } else {
                    least_connections()
                }
            }
            BalanceStrategy::RoundRobin => {
                let mut hasher = DefaultHasher::new();
                config.session_id.hash(&mut hasher);
                let index = usize::try_from(hasher.finish() % self.instances.len() as u64)
                    .unwrap_or(0);
                self.instances.get(index).cloned()
            }
        };

        selected.unwrap_or_else(|| "local".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer(strategy: BalanceStrategy) -> LoadBalancer {
        let balancer = LoadBalancer::new(
            vec!["east".to_string(), "west".to_string(), "north".to_string()],
            strategy,
        );
        balancer.update_stats("east", 10, 0.9);
        balancer.update_stats("west", 2, 0.5);
        balancer.update_stats("north", 5, 0.1);
        balancer
    }

    fn config_with_priority(p: u8) -> SessionConfig {
        let mut config = SessionConfig::new("user");
        config.priority = p;
        config
    }

    #[test]
    fn least_connections_picks_fewest() {
        let balancer = balancer(BalanceStrategy::LeastConnections);
        assert_eq!(
            balancer.select_instance(&config_with_priority(priority::NORMAL)),
            "west"
        );
    }

    #[test]
    fn least_load_picks_lowest_load() {
        let balancer = balancer(BalanceStrategy::LeastLoad);
        assert_eq!(
            balancer.select_instance(&config_with_priority(priority::NORMAL)),
            "north"
        );
    }

    #[test]
    fn priority_aware_splits_by_band() {
        let balancer = balancer(BalanceStrategy::PriorityAware);
        // High priority goes least-loaded, others least-connected.
        assert_eq!(
            balancer.select_instance(&config_with_priority(priority::CRITICAL)),
            "north"
        );
        assert_eq!(
            balancer.select_instance(&config_with_priority(priority::LOW)),
            "west"
        );
    }

    #[test]
    fn round_robin_is_deterministic_per_session() {
        let balancer = balancer(BalanceStrategy::RoundRobin);
        let config = config_with_priority(priority::NORMAL);
        let first = balancer.select_instance(&config);
        let second = balancer.select_instance(&config);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_instance_list_defaults_to_local() {
        let balancer = LoadBalancer::new(Vec::new(), BalanceStrategy::LeastLoad);
        assert_eq!(
            balancer.select_instance(&config_with_priority(priority::NORMAL)),
            "local"
        );
    }

    #[test]
    fn strategy_parses_from_env_style_strings() {
        assert_eq!(
            "least_connections".parse::<BalanceStrategy>().unwrap(),
            BalanceStrategy::LeastConnections
        );
        assert_eq!(
            "PRIORITY_AWARE".parse::<BalanceStrategy>().unwrap(),
            BalanceStrategy::PriorityAware
        );
    }
}
