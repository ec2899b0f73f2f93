use std::time::Duration;

use mediation_core::constants::{error_codes, properties};
use mediation_core::MessageContext;
use mediation_endpoint::{
    Endpoint, EndpointState, SendMode, TimeoutAction, TransportFault,
};
use mediation_errors::MediationError;
use mediation_testing_utils::{
    EndpointDefinitionBuilder, MockTransport, TestEnv, TransportOutcome,
};

const CONNECT: i32 = error_codes::CONNECTION_FAILED;

#[tokio::test]
async fn test_retry_disabled_code_surfaces_on_first_attempt() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "quote",
        EndpointDefinitionBuilder::new("http://quote")
            .with_retries(3, 0)
            .with_retry_disabled(vec![CONNECT])
            .build(),
    )
    .await;
    let transport = MockTransport::with_outcomes(vec![TransportOutcome::fault(CONNECT, "refused")]);
    let mut ctx = MessageContext::new();

    let err = endpoint
        .send(&mut ctx, &transport, &env, SendMode::Blocking)
        .await
        .unwrap_err();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(err.error_code(), Some(CONNECT));
    assert_eq!(ctx.error_code(), Some(CONNECT));
    assert_eq!(ctx.property_str(properties::ERROR_MESSAGE), Some("refused"));
    assert_eq!(endpoint.health().state().await, EndpointState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_suspended_endpoint_fails_fast_without_transport() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "quote",
        EndpointDefinitionBuilder::new("http://quote")
            .with_suspension(1_000, 2.0, 10_000)
            .build(),
    )
    .await;
    let transport = MockTransport::with_outcomes(vec![TransportOutcome::fault(CONNECT, "down")]);

    let mut first = MessageContext::new();
    assert!(endpoint
        .send(&mut first, &transport, &env, SendMode::Blocking)
        .await
        .is_err());
    assert_eq!(endpoint.health().state().await, EndpointState::Suspended);

    let mut second = MessageContext::new();
    let err = endpoint
        .send(&mut second, &transport, &env, SendMode::Blocking)
        .await
        .unwrap_err();

    assert_eq!(transport.call_count(), 1);
    match err {
        MediationError::EndpointSuspended {
            endpoint,
            code,
            remaining_ms,
        } => {
            assert_eq!(endpoint, "quote");
            assert_eq!(code, error_codes::ADDRESS_ENDPOINT_SUSPENDED);
            assert_eq!(remaining_ms, 1_000);
        }
        other => panic!("expected EndpointSuspended, got {other:?}"),
    }

    // 挂起期结束后允许再次发送
    tokio::time::advance(Duration::from_millis(1_001)).await;
    let mut third = MessageContext::new();
    endpoint
        .send(&mut third, &transport, &env, SendMode::Blocking)
        .await
        .unwrap();
    assert_eq!(transport.call_count(), 2);
    assert_eq!(endpoint.health().state().await, EndpointState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_pending_retry_stops_when_endpoint_suspended_meanwhile() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "quote",
        EndpointDefinitionBuilder::new("http://quote")
            .with_retries(1, 100)
            .with_suspension(10_000, 2.0, 60_000)
            .build(),
    )
    .await;
    let transport = MockTransport::with_outcomes(vec![
        TransportOutcome::fault(CONNECT, "a"),
        TransportOutcome::fault(CONNECT, "b"),
        TransportOutcome::fault(CONNECT, "a-retry"),
    ]);
    let mut first = MessageContext::new();
    let mut second = MessageContext::new();

    // 第二条消息在第一条的重试等待期间把端点挂起
    let (first_result, second_result) = tokio::join!(
        endpoint.send(&mut first, &transport, &env, SendMode::Blocking),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            endpoint
                .send(&mut second, &transport, &env, SendMode::Blocking)
                .await
        }
    );

    assert!(matches!(
        second_result,
        Err(MediationError::DispatchFault { code, .. }) if code == CONNECT
    ));
    match first_result {
        Err(MediationError::EndpointSuspended { remaining_ms, .. }) => {
            assert!(remaining_ms <= 10_000);
        }
        other => panic!("expected EndpointSuspended, got {other:?}"),
    }
    assert_eq!(transport.call_count(), 2);

    let snapshot = endpoint.health().snapshot().await;
    assert_eq!(snapshot.state, EndpointState::Suspended);
    assert_eq!(snapshot.current_suspend_ms, Some(10_000));

    let mut third = MessageContext::new();
    match endpoint
        .send(&mut third, &transport, &env, SendMode::Blocking)
        .await
    {
        Err(MediationError::EndpointSuspended { remaining_ms, .. }) => {
            assert!(remaining_ms <= 10_000);
        }
        other => panic!("expected EndpointSuspended, got {other:?}"),
    }
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_with_delay_then_suspends() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "quote",
        EndpointDefinitionBuilder::new("http://quote")
            .with_retries(2, 100)
            .with_suspension(5_000, 1.0, 5_000)
            .build(),
    )
    .await;
    let transport = MockTransport::new().with_default(TransportOutcome::fault(CONNECT, "down"));
    let mut ctx = MessageContext::new();
    let started = tokio::time::Instant::now();

    let err = endpoint
        .send(&mut ctx, &transport, &env, SendMode::Blocking)
        .await
        .unwrap_err();

    assert!(matches!(err, MediationError::DispatchFault { code, .. } if code == CONNECT));
    assert_eq!(transport.call_count(), 3);
    assert!(started.elapsed() >= Duration::from_millis(200));
    let snapshot = endpoint.health().snapshot().await;
    assert_eq!(snapshot.state, EndpointState::Suspended);
    assert_eq!(snapshot.current_suspend_ms, Some(5_000));
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_within_threshold() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "quote",
        EndpointDefinitionBuilder::new("http://quote").with_retries(2, 0).build(),
    )
    .await;
    let transport = MockTransport::with_outcomes(vec![
        TransportOutcome::fault(CONNECT, "blip"),
        TransportOutcome::Success,
    ]);
    let mut ctx = MessageContext::new();
    ctx.set_property(properties::BLOCKING_SENDER_ERROR, true);

    endpoint
        .send(&mut ctx, &transport, &env, SendMode::Blocking)
        .await
        .unwrap();

    assert_eq!(transport.call_count(), 2);
    assert!(!ctx.has_property(properties::BLOCKING_SENDER_ERROR));
    assert_eq!(ctx.property_str(properties::LAST_ENDPOINT), Some("quote"));
    assert_eq!(endpoint.health().state().await, EndpointState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_discard_action() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "slow",
        EndpointDefinitionBuilder::new("http://slow")
            .with_timeout(100, TimeoutAction::Discard)
            .build(),
    )
    .await;
    let transport = MockTransport::with_outcomes(vec![TransportOutcome::Hang]);
    let mut ctx = MessageContext::new();

    let err = endpoint
        .send(&mut ctx, &transport, &env, SendMode::Blocking)
        .await
        .unwrap_err();

    assert!(matches!(err, MediationError::Timeout(_)));
    assert_eq!(ctx.error_code(), Some(error_codes::TIMEOUT_ERROR));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_fault_action() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "slow",
        EndpointDefinitionBuilder::new("http://slow")
            .with_timeout(100, TimeoutAction::Fault)
            .build(),
    )
    .await;
    let transport = MockTransport::with_outcomes(vec![TransportOutcome::Hang]);
    let mut ctx = MessageContext::new();

    let err = endpoint
        .send(&mut ctx, &transport, &env, SendMode::Blocking)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), Some(error_codes::TIMEOUT_ERROR));
}

#[tokio::test]
async fn test_indirect_endpoint_shares_target_health() {
    let env = TestEnv::environment();
    let real = TestEnv::register_address(
        &env,
        "real",
        EndpointDefinitionBuilder::new("http://real").build(),
    )
    .await;
    let alias = env
        .registry()
        .register(Endpoint::indirect("alias", "real").unwrap())
        .await
        .unwrap();
    alias.init(&env).await.unwrap();
    let transport = MockTransport::with_outcomes(vec![TransportOutcome::fault(CONNECT, "down")]);
    let mut ctx = MessageContext::new();

    assert!(alias
        .send(&mut ctx, &transport, &env, SendMode::Blocking)
        .await
        .is_err());

    assert_eq!(transport.calls_to("http://real"), 1);
    assert_eq!(ctx.property_str(properties::LAST_ENDPOINT), Some("real"));
    assert_eq!(real.health().state().await, EndpointState::Suspended);
    assert_eq!(
        alias.snapshot(&env).await.unwrap().state,
        EndpointState::Suspended
    );
}

#[tokio::test]
async fn test_non_blocking_success_recorded_on_response_path() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "quote",
        EndpointDefinitionBuilder::new("http://quote").build(),
    )
    .await;
    let transport = MockTransport::new();
    let mut ctx = MessageContext::new();

    endpoint
        .send(&mut ctx, &transport, &env, SendMode::NonBlocking)
        .await
        .unwrap();
    assert_eq!(endpoint.health().snapshot().await.total_calls, 0);

    endpoint.record_response(&env).await.unwrap();
    assert_eq!(endpoint.health().snapshot().await.successful_calls, 1);
}

#[tokio::test]
async fn test_fault_response_feeds_health() {
    let env = TestEnv::environment();
    let endpoint = TestEnv::register_address(
        &env,
        "quote",
        EndpointDefinitionBuilder::new("http://quote").build(),
    )
    .await;
    let mut response = MessageContext::new();

    let err = endpoint
        .record_fault_response(
            &mut response,
            TransportFault {
                code: None,
                message: None,
                detail: Some("<fault/>".to_string()),
            },
            &env,
        )
        .await
        .unwrap();

    assert_eq!(
        err.error_code(),
        Some(error_codes::NON_BLOCKING_CALL_OPERATION_FAILED)
    );
    assert_eq!(response.property_str(properties::ERROR_DETAIL), Some("<fault/>"));
    assert_eq!(endpoint.health().state().await, EndpointState::Suspended);
}
