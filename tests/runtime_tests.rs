use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use mediation::MediationRuntime;
use mediation_config::AppConfig;
use mediation_core::constants::error_codes;
use mediation_core::{Mediator, MessageContext, Payload};
use mediation_dispatcher::{
    AggregateContentType, CallMediator, ResultTarget, ScatterGather, SequenceMediator, Target,
};
use mediation_endpoint::EndpointState;
use mediation_testing_utils::{MockTransport, TestEnv, TransportOutcome};
use serde_json::json;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
[logging]
level = "debug"
format = "compact"

[dispatch.endpoint_defaults]
initial_suspend_ms = 1000
progression_factor = 2.0
maximum_suspend_ms = 120000

[scatter_gather]
parallel_execution = false
timeout_ms = 2000

[[endpoints]]
name = "quote"
kind = "address"
uri = "http://localhost:9000/quote"

[endpoints.definition.suspend_on_failure]
initial_duration_ms = 500
progression_factor = 2.0
maximum_duration_ms = 1500

[[endpoints]]
name = "quote-alias"
kind = "indirect"
key = "quote"

[[endpoints]]
name = "dynamic"
kind = "address"
uri = "http://localhost:9000/dynamic"

[endpoints.definition.suspend_on_failure]
initial_duration_ms = "{${props.suspendMs}}"
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

async fn runtime() -> (MediationRuntime, NamedTempFile) {
    let file = write_config(CONFIG);
    let runtime = MediationRuntime::from_path(file.path().to_str())
        .await
        .unwrap();
    (runtime, file)
}

#[tokio::test]
async fn test_runtime_builds_registry_from_config_file() {
    let (runtime, _file) = runtime().await;

    let registry = runtime.environment().registry();
    assert_eq!(
        registry.names().await,
        vec!["dynamic".to_string(), "quote".to_string(), "quote-alias".to_string()]
    );
    assert_eq!(runtime.config().dispatch.endpoint_defaults.initial_suspend_ms, 1000);
    runtime.init_endpoints().await.unwrap();
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_endpoint_reports_resolve_policies() {
    let (runtime, _file) = runtime().await;

    let reports = runtime.endpoint_reports().await.unwrap();
    assert_eq!(reports.len(), 3);

    let quote = reports.iter().find(|r| r.name == "quote").unwrap();
    assert_eq!(quote.kind, "address");
    assert_eq!(quote.settings.initial, Duration::from_millis(500));
    assert_eq!(quote.settings.maximum, Duration::from_millis(1500));
    assert_eq!(quote.snapshot.state, EndpointState::Active);

    let alias = reports.iter().find(|r| r.name == "quote-alias").unwrap();
    assert_eq!(alias.kind, "indirect");
    assert_eq!(alias.resolved_to, "quote");
    assert_eq!(alias.settings, quote.settings);

    // 表达式在空消息上求值失败，退回配置的默认值
    let dynamic = reports.iter().find(|r| r.name == "dynamic").unwrap();
    assert_eq!(dynamic.settings.initial, Duration::from_millis(1000));
    assert_eq!(
        dynamic.definition["suspend_on_failure"]["initial_duration_ms"],
        json!("{${props.suspendMs}}")
    );
}

#[tokio::test]
async fn test_dangling_indirect_endpoint_rejected() {
    let file = write_config(
        r#"
[[endpoints]]
name = "alias"
kind = "indirect"
key = "missing"
"#,
    );
    let config = AppConfig::load(file.path().to_str()).unwrap();
    assert!(MediationRuntime::new(config).await.is_err());
}

#[tokio::test]
async fn test_missing_config_file_is_error() {
    assert!(MediationRuntime::from_path(Some("/nonexistent/mediation.toml"))
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_suspension_grows_then_resets_on_success() {
    let (runtime, _file) = runtime().await;
    let env = runtime.environment().clone();
    let endpoint = env.registry().get("quote").await.unwrap();
    let transport = MockTransport::with_outcomes(vec![
        TransportOutcome::fault(error_codes::CONNECTION_FAILED, "down"),
        TransportOutcome::fault(error_codes::CONNECTION_FAILED, "down"),
        TransportOutcome::fault(error_codes::CONNECTION_FAILED, "down"),
        TransportOutcome::fault(error_codes::CONNECTION_FAILED, "down"),
        TransportOutcome::respond_json(json!({"price": 7})),
    ]);
    let call = CallMediator::new("quote-call", Arc::new(transport.clone()), env.clone())
        .blocking(Arc::new(transport.clone()))
        .with_endpoint(endpoint.clone());

    // 500, 1000, 1500, 1500 (上限)
    for expected in [500u64, 1000, 1500, 1500] {
        let mut ctx = MessageContext::new();
        assert!(call.mediate(&mut ctx).await.is_err());
        let snapshot = endpoint.health().snapshot().await;
        assert_eq!(snapshot.state, EndpointState::Suspended);
        assert_eq!(snapshot.current_suspend_ms, Some(expected));
        tokio::time::advance(Duration::from_millis(expected + 1)).await;
    }

    let mut ctx = MessageContext::new();
    assert!(call.mediate(&mut ctx).await.unwrap());
    assert_eq!(ctx.payload, Payload::json(json!({"price": 7})));
    let snapshot = endpoint.health().snapshot().await;
    assert_eq!(snapshot.state, EndpointState::Active);
    assert_eq!(snapshot.current_suspend_ms, None);
    assert_eq!(transport.call_count(), 5);

    // 恢复后再次失败，从初始时长重新开始
    transport.push_outcome(TransportOutcome::fault(error_codes::CONNECTION_FAILED, "down"));
    let mut ctx = MessageContext::new();
    assert!(call.mediate(&mut ctx).await.is_err());
    assert_eq!(
        endpoint.health().snapshot().await.current_suspend_ms,
        Some(500)
    );
}

#[tokio::test]
async fn test_scatter_gather_uses_configured_defaults() {
    let (runtime, _file) = runtime().await;
    let config = runtime
        .scatter_gather_config(AggregateContentType::Json, ResultTarget::Body)
        .with_target(Target::new(Arc::new(
            SequenceMediator::anonymous("a", Vec::new()),
        )))
        .with_target(Target::new(Arc::new(
            SequenceMediator::anonymous("b", Vec::new()),
        )));
    assert!(!config.parallel_execution);
    assert_eq!(config.default_timeout_ms, Some(2000));

    let sg = ScatterGather::new("fan-out", config, TestEnv::environment()).unwrap();
    let mut ctx = MessageContext::with_payload(Payload::json(json!(1)));
    let report = sg.execute(&mut ctx).await.unwrap();

    assert_eq!(report.merged, 2);
    assert_eq!(ctx.payload, Payload::json(json!([1, 1])));
}
