use super::engine::EngineBackend;
use super::health::HealthRegistry;
use super::openai_compat::OpenAiCompatBackend;
use super::traits::Backend;
use super::BackendId;
use crate::config::BackendsConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// Build the executor set from config. Disabled or unconfigured backends are
/// simply absent from the map; the router treats absence as unavailability.
pub fn build_backends(
    config: &BackendsConfig,
    registry: &Arc<HealthRegistry>,
) -> HashMap<BackendId, Arc<dyn Backend>> {
    let mut backends: HashMap<BackendId, Arc<dyn Backend>> = HashMap::new();

    if config.main.enabled {
        backends.insert(
            BackendId::Main,
            Arc::new(EngineBackend::new(config.main.clone(), Arc::clone(registry))),
        );
    }

    for (id, backend_config) in [
        (BackendId::Local, &config.local),
        (BackendId::HeadlessA, &config.headless_a),
        (BackendId::HeadlessB, &config.headless_b),
    ] {
        if let Some(backend_config) = backend_config
            && backend_config.enabled
        {
            backends.insert(
                id,
                Arc::new(OpenAiCompatBackend::new(
                    id,
                    backend_config.clone(),
                    Arc::clone(registry),
                )),
            );
        }
    }

    tracing::info!(
        configured = backends.len(),
        "backend set initialized"
    );
    backends
}

/// The `BackendId`s a config would enable, without constructing clients.
pub fn configured_ids(config: &BackendsConfig) -> Vec<BackendId> {
    let mut ids = Vec::new();
    if config.main.enabled {
        ids.push(BackendId::Main);
    }
    for (id, backend_config) in [
        (BackendId::Local, &config.local),
        (BackendId::HeadlessA, &config.headless_a),
        (BackendId::HeadlessB, &config.headless_b),
    ] {
        if backend_config.as_ref().is_some_and(|c| c.enabled) {
            ids.push(id);
        }
    }
    ids
}
