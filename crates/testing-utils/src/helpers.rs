//! Test helper utilities and common testing patterns

use mediation_config::EndpointDefaults;
use mediation_core::ExpressionEvaluator;
use mediation_endpoint::{Endpoint, EndpointDefinition, EndpointRegistry, MediationEnvironment};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Environment with an empty registry and stock defaults
    pub fn environment() -> MediationEnvironment {
        MediationEnvironment::default()
    }

    pub fn environment_with(
        evaluator: Arc<dyn ExpressionEvaluator>,
        defaults: EndpointDefaults,
    ) -> MediationEnvironment {
        MediationEnvironment::new(evaluator, EndpointRegistry::new(), defaults)
    }

    /// Registers an address endpoint in the environment's registry
    pub async fn register_address(
        env: &MediationEnvironment,
        name: &str,
        definition: EndpointDefinition,
    ) -> Arc<Endpoint> {
        let address = definition
            .address
            .clone()
            .unwrap_or_else(|| format!("http://localhost/{name}"));
        env.registry()
            .register(Endpoint::address(name, address, definition).unwrap())
            .await
            .unwrap()
    }

    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = tokio::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        false
    }

    /// Set up logging for tests (safe to call from every test)
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}
