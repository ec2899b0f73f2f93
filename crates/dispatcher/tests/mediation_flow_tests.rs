use std::sync::Arc;

use serde_json::{json, Value};

use mediation_core::constants::{error_codes, properties};
use mediation_core::{Mediator, MessageContext, Payload, PolicyValue, SequenceType};
use mediation_dispatcher::{
    AggregateContentType, AggregationPolicy, CallMediator, CloseReason, ResultTarget,
    ScatterGather, ScatterGatherConfig, SequenceMediator, Target,
};
use mediation_endpoint::EndpointState;
use mediation_testing_utils::{
    EndpointDefinitionBuilder, MockTransport, RecordingMediator, TestEnv, TransportOutcome,
};

const CONNECT: i32 = error_codes::CONNECTION_FAILED;

#[tokio::test(start_paused = true)]
async fn test_failing_endpoint_diverts_then_fails_fast_while_suspended() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "stock",
        EndpointDefinitionBuilder::new("http://stock")
            .with_suspension(30_000, 2.0, 60_000)
            .build(),
    )
    .await;
    let transport = MockTransport::new().with_default(TransportOutcome::fault(CONNECT, "refused"));
    let on_error = RecordingMediator::new("stock-fault");
    let after = RecordingMediator::new("after-call");
    let proxy = SequenceMediator::new("stock-proxy", SequenceType::Proxy)
        .with_child(Arc::new(
            CallMediator::new("stock-call", Arc::new(transport.clone()), env.clone())
                .blocking(Arc::new(transport.clone()))
                .with_endpoint(endpoint.clone()),
        ))
        .with_child(Arc::new(after.clone()))
        .with_on_error(Arc::new(on_error.clone()));

    let mut first = MessageContext::with_payload(Payload::json(json!({"sku": "A-1"})));
    assert!(!proxy.mediate(&mut first).await.unwrap());
    assert_eq!(first.error_code(), Some(CONNECT));
    assert_eq!(endpoint.health().state().await, EndpointState::Suspended);

    let mut second = MessageContext::with_payload(Payload::json(json!({"sku": "A-2"})));
    assert!(!proxy.mediate(&mut second).await.unwrap());

    assert_eq!(transport.call_count(), 1);
    assert_eq!(
        second.error_code(),
        Some(error_codes::ADDRESS_ENDPOINT_SUSPENDED)
    );
    assert_eq!(on_error.invocations(), 2);
    assert_eq!(after.invocations(), 0);
}

#[tokio::test]
async fn test_nested_sequences_resume_last_pushed_first() {
    let env = TestEnv::environment();
    let transport = MockTransport::new();
    let call = Arc::new(CallMediator::new(
        "inventory-call",
        Arc::new(transport.clone()),
        env,
    ));
    let inner_after = RecordingMediator::new("inner-after").with_property("inner", json!(true));
    let outer_after = RecordingMediator::new("outer-after").with_payload(Payload::text("done"));
    let inner = Arc::new(
        SequenceMediator::new("inner", SequenceType::Named)
            .with_child(call.clone())
            .with_child(Arc::new(inner_after.clone())),
    );
    let outer = SequenceMediator::new("outer", SequenceType::Proxy)
        .with_child(Arc::new(RecordingMediator::new("outer-before")))
        .with_child(inner.clone())
        .with_child(Arc::new(outer_after.clone()));
    let mut ctx = MessageContext::new();

    assert!(!outer.mediate(&mut ctx).await.unwrap());
    assert_eq!(inner_after.invocations(), 0);

    let mut response = transport.last_sent().unwrap();
    assert_eq!(response.continuation.len(), 3);

    let frame = call.on_response(&mut response).await.unwrap();
    assert_eq!(frame.sequence_name, "inner");
    assert!(inner.resume(&mut response, &frame).await.unwrap());
    assert!(response.property_bool("inner"));
    assert_eq!(outer_after.invocations(), 0);

    let outer_frame = response.continuation.peek().cloned().unwrap();
    assert_eq!(outer_frame.sequence_name, "outer");
    assert_eq!(outer_frame.position, 1);
    assert!(outer.resume(&mut response, &outer_frame).await.unwrap());

    assert_eq!(outer_after.invocations(), 1);
    assert_eq!(response.payload, Payload::text("done"));
    assert!(response.continuation.is_empty());
}

#[tokio::test]
async fn test_scatter_gather_over_blocking_calls_excludes_failed_vendor() {
    let env = TestEnv::environment();
    let transport = MockTransport::new();
    transport.script_address(
        "http://vendor-a",
        vec![TransportOutcome::respond_json(json!({"vendor": "a", "price": 10}))],
    );
    transport.script_address(
        "http://vendor-b",
        vec![TransportOutcome::respond_json(json!({"vendor": "b", "price": 12}))],
    );
    transport.script_address(
        "http://vendor-c",
        vec![TransportOutcome::fault(CONNECT, "refused")],
    );

    let mut config = ScatterGatherConfig::new(AggregateContentType::Json, ResultTarget::Body)
        .with_aggregation(AggregationPolicy {
            min_messages: Some(PolicyValue::literal(2)),
            max_messages: Some(PolicyValue::literal(3)),
            ..AggregationPolicy::default()
        });
    for vendor in ["a", "b", "c"] {
        let endpoint = TestEnv::register_address(
            &env,
            &format!("vendor-{vendor}"),
            EndpointDefinitionBuilder::new(&format!("http://vendor-{vendor}")).build(),
        )
        .await;
        let call = CallMediator::new(
            format!("quote-{vendor}"),
            Arc::new(transport.clone()),
            env.clone(),
        )
        .blocking(Arc::new(transport.clone()))
        .with_endpoint(endpoint);
        let branch = SequenceMediator::new(format!("branch-{vendor}"), SequenceType::Anonymous)
            .with_child(Arc::new(call));
        config = config.with_target(Target::new(Arc::new(branch)).with_id(vendor));
    }
    let sg = ScatterGather::new("best-quote", config, env).unwrap();
    let mut ctx = MessageContext::with_payload(Payload::json(json!({"sku": "A-1"})));

    let report = sg.execute(&mut ctx).await.unwrap();

    assert_eq!(report.reason, CloseReason::AllBranches);
    assert_eq!(report.merged, 2);
    assert_eq!(report.excluded, 1);
    assert!(report.warning.is_none());
    assert_eq!(transport.call_count(), 3);
    let vendors: Vec<String> = match &ctx.payload {
        Payload::Json(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item["vendor"].as_str().map(str::to_string))
            .collect(),
        other => panic!("unexpected payload: {other:?}"),
    };
    assert_eq!(vendors.len(), 2);
    assert!(vendors.contains(&"a".to_string()));
    assert!(vendors.contains(&"b".to_string()));
    assert!(!ctx.property_bool(properties::SCATTER_GATHER_PARTIAL));
}

#[tokio::test]
async fn test_branch_forks_do_not_leak_into_original_message() {
    let config = ScatterGatherConfig::new(
        AggregateContentType::Xml {
            root_element: "results".to_string(),
        },
        ResultTarget::Variable("gathered".to_string()),
    )
    .with_target(Target::new(Arc::new(
        RecordingMediator::new("a")
            .with_property("branch-only", json!(1))
            .with_payload(Payload::xml("<r>a</r>")),
    )))
    .sequential();
    let sg = ScatterGather::new("fan-out", config, TestEnv::environment()).unwrap();
    let mut ctx = MessageContext::with_payload(Payload::json(json!({"keep": true})));

    sg.execute(&mut ctx).await.unwrap();

    assert!(!ctx.has_property("branch-only"));
    assert!(!ctx.has_property(properties::SCATTER_GATHER_CORRELATION_ID));
    assert_eq!(ctx.payload, Payload::json(json!({"keep": true})));
    assert_eq!(
        ctx.get_variable("gathered"),
        Some(&json!("<results><r>a</r></results>"))
    );
}
