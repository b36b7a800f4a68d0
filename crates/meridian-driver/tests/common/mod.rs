#![allow(dead_code)]

use std::sync::Arc;

use meridian_driver::{
    Context, DiscoveryInterval, Driver, DriverConfig, MockEndpoint, MockNetwork, TypedOperation,
};

pub const RUN_METHOD: &str = "/meridian.test.v1.TestService/Run";
pub const RUN_REQUEST_URL: &str = "type.meridianapis.io/meridian.test.v1.RunRequest";
pub const WATCH_METHOD: &str = "/meridian.test.v1.TestService/Watch";
pub const WATCH_REQUEST_URL: &str = "type.meridianapis.io/meridian.test.v1.WatchRequest";
pub const RESULT_URL: &str = "type.meridianapis.io/meridian.test.v1.RunResult";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunRequest {
    #[prost(string, tag = "1")]
    pub query: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunResult {
    #[prost(string, tag = "1")]
    pub answer: String,
}

pub fn run_op(query: &str) -> TypedOperation<RunRequest, RunResult> {
    TypedOperation::new(
        RUN_METHOD,
        RUN_REQUEST_URL,
        RunRequest {
            query: query.into(),
        },
    )
}

pub fn result_payload(answer: &str) -> meridian_proto::Any {
    meridian_proto::any_from(
        RESULT_URL,
        &RunResult {
            answer: answer.into(),
        },
    )
}

/// A driver with discovery disabled, pinned to one scripted endpoint.
pub async fn single_node_driver(config: DriverConfig) -> (Driver, Arc<MockEndpoint>, MockNetwork) {
    let network = MockNetwork::new();
    let endpoint = network.add_endpoint("h:1234");
    let driver = Driver::dial(
        &Context::background(),
        "h:1234",
        config
            .with_discovery_interval(DiscoveryInterval::Disabled)
            .with_mock_network(network.clone()),
    )
    .await
    .expect("dial");
    (driver, endpoint, network)
}
