use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use mediation_config::{EndpointDefaults, EndpointEntry, EndpointKind as ConfigEndpointKind};
use mediation_core::{ExpressionEvaluator, PropertyLookupEvaluator};
use mediation_errors::{MediationError, MediationResult};
use mediation_observability::DispatchMetrics;

use crate::definition::EndpointDefinition;
use crate::endpoint::{Endpoint, EndpointKind};
use crate::health::HealthSnapshot;

const MAX_INDIRECTION_DEPTH: usize = 8;

/// Named endpoints shared by every mediator. Each endpoint owns its health
/// state, so the registry is the single owner of all runtime health.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Arc<RwLock<HashMap<String, Arc<Endpoint>>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from configuration entries. Dangling or cyclic
    /// indirect endpoints are configuration errors.
    pub async fn from_entries(entries: &[EndpointEntry]) -> MediationResult<Self> {
        let registry = Self::new();
        for entry in entries {
            registry.register(endpoint_from_entry(entry)?).await?;
        }
        for entry in entries {
            if let Some(key) = &entry.key {
                registry.resolve(key).await?;
            }
        }
        info!("端点注册表已加载 {} 个端点", entries.len());
        Ok(registry)
    }

    pub async fn register(&self, endpoint: Endpoint) -> MediationResult<Arc<Endpoint>> {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(endpoint.name()) {
            return Err(MediationError::config_error(format!(
                "端点名称重复: {}",
                endpoint.name()
            )));
        }
        let endpoint = Arc::new(endpoint);
        endpoints.insert(endpoint.name().to_string(), Arc::clone(&endpoint));
        Ok(endpoint)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.read().await.get(name).cloned()
    }

    /// Follows indirect endpoints until a concrete one is reached.
    pub async fn resolve(&self, key: &str) -> MediationResult<Arc<Endpoint>> {
        let endpoints = self.endpoints.read().await;
        let mut current = key;
        for _ in 0..MAX_INDIRECTION_DEPTH {
            let endpoint = endpoints
                .get(current)
                .ok_or_else(|| MediationError::endpoint_not_found(current))?;
            match endpoint.kind() {
                EndpointKind::Indirect { key } => current = key,
                _ => return Ok(Arc::clone(endpoint)),
            }
        }
        Err(MediationError::config_error(format!(
            "间接端点 {key} 引用层级过深或存在循环"
        )))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }

    pub async fn snapshots(&self) -> Vec<(String, HealthSnapshot)> {
        let endpoints: Vec<Arc<Endpoint>> = self.endpoints.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            snapshots.push((endpoint.name().to_string(), endpoint.health().snapshot().await));
        }
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }
}

fn endpoint_from_entry(entry: &EndpointEntry) -> MediationResult<Endpoint> {
    let definition = match &entry.definition {
        Some(value) => EndpointDefinition::from_json(value.clone())?,
        None => EndpointDefinition::default(),
    };
    let missing = |field: &str| {
        MediationError::config_error(format!("端点 {} 缺少字段 {}", entry.name, field))
    };
    let kind = match entry.kind {
        ConfigEndpointKind::Address => EndpointKind::Address {
            uri: entry.uri.clone().ok_or_else(|| missing("uri"))?,
        },
        ConfigEndpointKind::Wsdl => EndpointKind::Wsdl {
            uri: entry.uri.clone().ok_or_else(|| missing("uri"))?,
            service: entry.service.clone().ok_or_else(|| missing("service"))?,
            port: entry.port.clone().ok_or_else(|| missing("port"))?,
        },
        ConfigEndpointKind::Default => EndpointKind::Default,
        ConfigEndpointKind::Indirect => EndpointKind::Indirect {
            key: entry.key.clone().ok_or_else(|| missing("key"))?,
        },
    };
    Endpoint::new(entry.name.clone(), kind, definition)
}

/// Collaborators handed to every mediator: the expression evaluator, the
/// endpoint registry and the endpoint policy defaults.
#[derive(Clone)]
pub struct MediationEnvironment {
    evaluator: Arc<dyn ExpressionEvaluator>,
    registry: EndpointRegistry,
    defaults: EndpointDefaults,
    metrics: DispatchMetrics,
}

impl std::fmt::Debug for MediationEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediationEnvironment")
            .field("registry", &self.registry)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl Default for MediationEnvironment {
    fn default() -> Self {
        Self::new(
            Arc::new(PropertyLookupEvaluator),
            EndpointRegistry::new(),
            EndpointDefaults::default(),
        )
    }
}

impl MediationEnvironment {
    pub fn new(
        evaluator: Arc<dyn ExpressionEvaluator>,
        registry: EndpointRegistry,
        defaults: EndpointDefaults,
    ) -> Self {
        Self {
            evaluator,
            registry,
            defaults,
            metrics: DispatchMetrics,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_defaults(mut self, defaults: EndpointDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn defaults(&self) -> &EndpointDefaults {
        &self.defaults
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(name: &str, kind: ConfigEndpointKind) -> EndpointEntry {
        EndpointEntry {
            name: name.to_string(),
            kind,
            uri: None,
            service: None,
            port: None,
            key: None,
            definition: None,
        }
    }

    #[tokio::test]
    async fn test_from_entries_builds_all_kinds() {
        let mut quote = entry("quote", ConfigEndpointKind::Address);
        quote.uri = Some("http://localhost:9000/quote".to_string());
        quote.definition = Some(json!({
            "suspend_on_failure": { "initial_duration_ms": 1000, "progression_factor": 2.0 }
        }));
        let mut alias = entry("quote-alias", ConfigEndpointKind::Indirect);
        alias.key = Some("quote".to_string());
        let implicit = entry("implicit", ConfigEndpointKind::Default);

        let registry = EndpointRegistry::from_entries(&[quote, alias, implicit])
            .await
            .unwrap();

        assert_eq!(registry.len().await, 3);
        let resolved = registry.resolve("quote-alias").await.unwrap();
        assert_eq!(resolved.name(), "quote");
        assert_eq!(
            resolved.definition().address.as_deref(),
            Some("http://localhost:9000/quote")
        );
        assert_eq!(registry.names().await, vec!["implicit", "quote", "quote-alias"]);
    }

    #[tokio::test]
    async fn test_dangling_indirect_is_configuration_error() {
        let mut alias = entry("alias", ConfigEndpointKind::Indirect);
        alias.key = Some("missing".to_string());
        let err = EndpointRegistry::from_entries(&[alias]).await.unwrap_err();
        assert!(matches!(err, MediationError::EndpointNotFound { .. }));
    }

    #[tokio::test]
    async fn test_indirect_cycle_detected() {
        let registry = EndpointRegistry::new();
        registry.register(Endpoint::indirect("a", "b").unwrap()).await.unwrap();
        registry.register(Endpoint::indirect("b", "a").unwrap()).await.unwrap();
        assert!(matches!(
            registry.resolve("a").await,
            Err(MediationError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = EndpointRegistry::new();
        registry
            .register(Endpoint::default_endpoint("x", EndpointDefinition::default()).unwrap())
            .await
            .unwrap();
        assert!(registry
            .register(Endpoint::default_endpoint("x", EndpointDefinition::default()).unwrap())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_invalid_definition_rejected_at_construction() {
        let mut bad = entry("bad", ConfigEndpointKind::Default);
        bad.definition = Some(json!({
            "retry_config": { "disabled_error_codes": [1], "enabled_error_codes": [2] }
        }));
        assert!(matches!(
            EndpointRegistry::from_entries(&[bad]).await,
            Err(MediationError::Configuration(_))
        ));
    }
}
