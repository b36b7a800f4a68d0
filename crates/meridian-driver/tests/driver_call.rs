//! Unary call-path behavior over the scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RunResult, result_payload, run_op, single_node_driver};
use meridian_driver::{
    AccessTokenCredentials, BalancingMethod, Context, DiscoveryInterval, Driver, DriverConfig,
    DriverError, MockNetwork, StatusCode, TransportReason,
};
use pretty_assertions::assert_eq;

fn base_config() -> DriverConfig {
    DriverConfig::new("/prod/orders")
}

#[tokio::test]
async fn bootstrap_with_discovery_disabled() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;

    // The single conn is the seed itself.
    let mut rows = Vec::new();
    driver.stats(|row| rows.push(row.endpoint.host_port()));
    assert_eq!(rows, vec!["h:1234"]);
    assert_eq!(endpoint.dials(), 1);
    assert_eq!(endpoint.open_channels(), 1);

    driver.close().await.unwrap();
    assert_eq!(endpoint.open_channels(), 0, "close closes exactly one transport");
}

#[tokio::test]
async fn call_decodes_the_result_payload() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;
    endpoint.enqueue_result(Some(result_payload("42 rows")));

    let mut op = run_op("SELECT 1");
    driver.call(&Context::background(), &mut op).await.unwrap();
    assert_eq!(
        op.take_response(),
        Some(RunResult {
            answer: "42 rows".into()
        })
    );
    driver.close().await.unwrap();
}

#[tokio::test]
async fn call_tolerates_a_missing_result_body() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;
    endpoint.enqueue_result(None);

    let mut op = run_op("CREATE TABLE t ()");
    driver.call(&Context::background(), &mut op).await.unwrap();
    assert_eq!(op.take_response(), None);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn metadata_carries_database_and_auth_ticket() {
    let (driver, endpoint, _network) = single_node_driver(
        base_config().with_credentials(Arc::new(AccessTokenCredentials::new("t1.ticket"))),
    )
    .await;
    endpoint.enqueue_result(None);

    driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap();
    let calls = endpoint.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].meta.database, "/prod/orders");
    assert_eq!(calls[0].meta.auth_token.as_deref(), Some("t1.ticket"));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn configured_hints_ride_the_request() {
    let (driver, endpoint, _network) = single_node_driver(
        base_config()
            .with_operation_timeout(Duration::from_secs(2))
            .with_operation_cancel_after(Duration::from_secs(7)),
    )
    .await;
    endpoint.enqueue_result(None);

    driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap();
    let params = endpoint.calls()[0].request.params.clone().expect("params");
    assert_eq!(params.operation_timeout.unwrap().seconds, 2);
    assert_eq!(params.cancel_after.unwrap().seconds, 7);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn context_deadline_becomes_an_operation_hint() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;
    endpoint.enqueue_result(None);

    let ctx = Context::background().with_timeout(Duration::from_secs(30));
    driver.call(&ctx, &mut run_op("SELECT 1")).await.unwrap();
    let params = endpoint.calls()[0].request.params.clone().expect("params");
    let derived = params.operation_timeout.expect("derived hint");
    assert!(derived.seconds >= 29, "derived {derived:?}");
    driver.close().await.unwrap();
}

#[tokio::test]
async fn not_ready_envelope_is_terminal() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;
    endpoint.enqueue_not_ready();

    let err = driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::OperationNotReady));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn non_success_status_maps_to_operation_error() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;
    endpoint.enqueue_status(StatusCode::Overloaded, vec![]);

    let err = driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap_err();
    match err {
        DriverError::Operation { status, .. } => assert_eq!(status, StatusCode::Overloaded),
        other => panic!("unexpected error: {other:?}"),
    }

    // A permanent API error is not endpoint-health information.
    let mut failed = 0;
    let mut errs = 0.0;
    driver.stats(|row| {
        failed += row.stats.op_failed;
        errs += row.stats.errs_per_minute;
    });
    assert_eq!(failed, 1);
    assert_eq!(errs, 0.0);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn transport_failures_keep_their_reason() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;
    endpoint.enqueue_transport_error(TransportReason::ResourceExhausted, "too many streams");

    let err = driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DriverError::Transport {
            reason: TransportReason::ResourceExhausted,
            ..
        }
    ));
    driver.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn request_timeout_dominates_a_hanging_server() {
    let (driver, endpoint, _network) =
        single_node_driver(base_config().with_request_timeout(Duration::from_millis(10))).await;
    endpoint.enqueue_hang();

    let err = driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::DeadlineExceeded));

    let mut failed = 0;
    let mut errs = 0.0;
    driver.stats(|row| {
        failed += row.stats.op_failed;
        errs += row.stats.errs_per_minute;
    });
    assert_eq!(failed, 1);
    assert_eq!(errs, 1.0, "timeouts count toward the error rate");
    driver.close().await.unwrap();
}

#[tokio::test]
async fn cancelling_the_caller_context_aborts_the_call() {
    let (driver, endpoint, _network) = single_node_driver(base_config()).await;
    endpoint.enqueue_hang();

    let (ctx, source) = Context::background().with_cancel();
    let call = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.call(&ctx, &mut run_op("SELECT 1")).await })
    };
    // Cancel only once the RPC is known to be in flight.
    while endpoint.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    source.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, DriverError::Cancelled));

    let mut failed = 0;
    let mut errs = 0.0;
    driver.stats(|row| {
        failed += row.stats.op_failed;
        errs += row.stats.errs_per_minute;
    });
    assert_eq!(failed, 1);
    assert_eq!(errs, 1.0);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn closed_driver_fails_fast_regardless_of_deadline() {
    let (driver, _endpoint, _network) = single_node_driver(base_config()).await;
    driver.close().await.unwrap();
    driver.close().await.unwrap(); // idempotent

    let ctx = Context::background().with_timeout(Duration::from_secs(3600));
    let err = driver.call(&ctx, &mut run_op("SELECT 1")).await.unwrap_err();
    assert!(matches!(err, DriverError::Closed));
}

#[tokio::test]
async fn dial_discovers_and_spreads_calls() {
    let network = MockNetwork::new();
    let seed = network.add_endpoint("seed:2135");
    let node_a = network.add_endpoint("node-a:2135");
    let node_b = network.add_endpoint("node-b:2135");
    seed.enqueue_endpoint_list(
        &[("node-a", 2135, 0.1, "dc-1"), ("node-b", 2135, 0.2, "dc-1")],
        "dc-1",
    );

    let driver = Driver::dial(
        &Context::background(),
        "seed:2135",
        DriverConfig::new("/prod/orders")
            .with_balancing_method(BalancingMethod::RoundRobin)
            .with_discovery_interval(DiscoveryInterval::Every(Duration::from_secs(3600)))
            .with_mock_network(network.clone()),
    )
    .await
    .unwrap();

    // The listing RPC carried the database name, and its throwaway
    // channel is gone.
    assert_eq!(seed.calls().len(), 1);
    assert_eq!(seed.calls()[0].meta.database, "/prod/orders");
    assert_eq!(seed.open_channels(), 0);

    node_a.enqueue_result(None);
    node_b.enqueue_result(None);
    driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap();
    driver
        .call(&Context::background(), &mut run_op("SELECT 2"))
        .await
        .unwrap();
    assert_eq!(node_a.calls().len(), 1);
    assert_eq!(node_b.calls().len(), 1);

    driver.close().await.unwrap();
    assert_eq!(node_a.open_channels(), 0);
    assert_eq!(node_b.open_channels(), 0);
}

#[tokio::test]
async fn credential_failures_surface_verbatim() {
    use async_trait::async_trait;
    use meridian_driver::Credentials;
    use meridian_driver::credentials::CredentialsError;

    struct Broken;

    #[async_trait]
    impl Credentials for Broken {
        async fn token(&self, _ctx: &Context) -> Result<String, CredentialsError> {
            Err("IAM says no".into())
        }
    }

    let (driver, _endpoint, _network) =
        single_node_driver(base_config().with_credentials(Arc::new(Broken))).await;
    let err = driver
        .call(&Context::background(), &mut run_op("SELECT 1"))
        .await
        .unwrap_err();
    match err {
        DriverError::Credentials(source) => assert_eq!(source.to_string(), "IAM says no"),
        other => panic!("unexpected error: {other:?}"),
    }
    driver.close().await.unwrap();
}
