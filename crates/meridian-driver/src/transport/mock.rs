//! Scripted in-process transport.
//!
//! The mock network stands in for the real gRPC stack: tests (and offline
//! tooling) dial scripted endpoints, enqueue unary and stream outcomes,
//! and assert on the calls each endpoint actually received.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use meridian_proto::discovery::{EndpointInfo, ListEndpointsResult};
use meridian_proto::operations::{
    CallRequest, CallResponse, Issue, Operation, StatusCode, StreamResponse,
};
use meridian_proto::{Any, any_from, type_url};

use crate::errors::{DriverError, DriverResult, TransportReason};
use crate::meta::CallMeta;

/// A set of scripted endpoints addressable by `host:port`.
#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<String, Arc<MockEndpoint>>,
    refused: HashSet<String>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint the network will accept dials for.
    pub fn add_endpoint(&self, host_port: impl Into<String>) -> Arc<MockEndpoint> {
        let host_port = host_port.into();
        let endpoint = Arc::new(MockEndpoint::new(host_port.clone()));
        self.inner
            .lock()
            .endpoints
            .insert(host_port, endpoint.clone());
        endpoint
    }

    /// Make dials to `host_port` fail with a transport error until
    /// [`MockNetwork::allow`] is called.
    pub fn refuse(&self, host_port: impl Into<String>) {
        self.inner.lock().refused.insert(host_port.into());
    }

    pub fn allow(&self, host_port: &str) {
        self.inner.lock().refused.remove(host_port);
    }

    pub(crate) fn dial(&self, host_port: &str) -> DriverResult<Arc<MockChannel>> {
        let state = self.inner.lock();
        if state.refused.contains(host_port) {
            return Err(DriverError::transport(
                TransportReason::Unavailable,
                format!("{host_port}: connection refused"),
            ));
        }
        match state.endpoints.get(host_port) {
            Some(endpoint) => {
                endpoint.dials.fetch_add(1, Ordering::Relaxed);
                endpoint.open_channels.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(MockChannel {
                    endpoint: endpoint.clone(),
                }))
            }
            None => Err(DriverError::transport(
                TransportReason::Unavailable,
                format!("no route to {host_port}"),
            )),
        }
    }
}

/// A dialed channel. Dropping the last clone closes it, which the owning
/// endpoint's [`MockEndpoint::open_channels`] counter observes.
pub struct MockChannel {
    endpoint: Arc<MockEndpoint>,
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChannel").finish()
    }
}

impl MockChannel {
    pub(crate) fn endpoint(&self) -> &MockEndpoint {
        &self.endpoint
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.endpoint.open_channels.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One scripted unary outcome.
enum UnaryScript {
    Respond(CallResponse),
    Fail(TransportReason, String),
    Hang,
}

/// One scripted event of a server stream.
enum StreamStep {
    Message(StreamResponse),
    Fail(TransportReason, String),
    Hang,
}

/// Builder for a scripted server stream. The stream ends cleanly after
/// the last step unless a step fails first.
#[derive(Default)]
pub struct StreamScript {
    steps: Vec<StreamStep>,
}

impl StreamScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A successful data message carrying `payload`.
    pub fn payload(mut self, payload: Any) -> Self {
        self.steps.push(StreamStep::Message(StreamResponse {
            status: StatusCode::Success as i32,
            issues: vec![],
            payload: Some(payload),
        }));
        self
    }

    /// A message with an explicit embedded status.
    pub fn message(mut self, status: StatusCode, issues: Vec<Issue>, payload: Option<Any>) -> Self {
        self.steps.push(StreamStep::Message(StreamResponse {
            status: status as i32,
            issues,
            payload,
        }));
        self
    }

    /// A transport-level failure in place of the next message.
    pub fn transport_error(mut self, reason: TransportReason, message: impl Into<String>) -> Self {
        self.steps.push(StreamStep::Fail(reason, message.into()));
        self
    }

    /// Block on the next receive until the caller's context gives up.
    pub fn hang(mut self) -> Self {
        self.steps.push(StreamStep::Hang);
        self
    }
}

/// A unary or streaming call as the endpoint saw it.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub method: String,
    pub request: CallRequest,
    pub meta: CallMeta,
}

#[derive(Default)]
struct EndpointScript {
    unary: VecDeque<UnaryScript>,
    streams: VecDeque<Vec<StreamStep>>,
    calls: Vec<RecordedCall>,
}

/// A scripted endpoint.
pub struct MockEndpoint {
    host_port: String,
    dials: AtomicUsize,
    open_channels: AtomicUsize,
    script: Mutex<EndpointScript>,
}

impl MockEndpoint {
    fn new(host_port: String) -> Self {
        MockEndpoint {
            host_port,
            dials: AtomicUsize::new(0),
            open_channels: AtomicUsize::new(0),
            script: Mutex::new(EndpointScript::default()),
        }
    }

    pub fn host_port(&self) -> &str {
        &self.host_port
    }

    /// How many times the dialer connected to this endpoint.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }

    /// Channels dialed and not yet dropped.
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::Relaxed)
    }

    /// Every call the endpoint received, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.lock().calls.clone()
    }

    pub fn enqueue_response(&self, response: CallResponse) {
        self.script
            .lock()
            .unary
            .push_back(UnaryScript::Respond(response));
    }

    /// Enqueue a successful envelope carrying `result`.
    pub fn enqueue_result(&self, result: Option<Any>) {
        self.enqueue_response(success_response(result));
    }

    /// Enqueue an envelope with a non-success status.
    pub fn enqueue_status(&self, status: StatusCode, issues: Vec<Issue>) {
        self.enqueue_response(status_response(status, issues));
    }

    /// Enqueue an envelope whose operation is not ready.
    pub fn enqueue_not_ready(&self) {
        self.enqueue_response(not_ready_response());
    }

    /// Enqueue a transport-level unary failure.
    pub fn enqueue_transport_error(&self, reason: TransportReason, message: impl Into<String>) {
        self.script
            .lock()
            .unary
            .push_back(UnaryScript::Fail(reason, message.into()));
    }

    /// Enqueue a unary call that never completes; the caller's context
    /// deadline or cancellation must end it.
    pub fn enqueue_hang(&self) {
        self.script.lock().unary.push_back(UnaryScript::Hang);
    }

    pub fn enqueue_stream(&self, script: StreamScript) {
        self.script.lock().streams.push_back(script.steps);
    }

    /// Enqueue a successful `ListEndpoints` envelope. Endpoints are given
    /// as `(address, port, load_factor, location)`.
    pub fn enqueue_endpoint_list(&self, endpoints: &[(&str, u16, f32, &str)], self_location: &str) {
        let listing = ListEndpointsResult {
            endpoints: endpoints
                .iter()
                .map(|(address, port, load_factor, location)| EndpointInfo {
                    address: (*address).to_owned(),
                    port: u32::from(*port),
                    load_factor: *load_factor,
                    location: (*location).to_owned(),
                })
                .collect(),
            self_location: self_location.to_owned(),
        };
        self.enqueue_result(Some(any_from(type_url::LIST_ENDPOINTS_RESULT, &listing)));
    }

    pub(crate) async fn unary(
        &self,
        method: &str,
        request: CallRequest,
        meta: &CallMeta,
    ) -> DriverResult<CallResponse> {
        let script = {
            let mut state = self.script.lock();
            state.calls.push(RecordedCall {
                method: method.to_owned(),
                request,
                meta: meta.clone(),
            });
            state.unary.pop_front()
        };
        match script {
            Some(UnaryScript::Respond(response)) => Ok(response),
            Some(UnaryScript::Fail(reason, message)) => Err(DriverError::Transport {
                reason,
                message,
            }),
            Some(UnaryScript::Hang) => std::future::pending().await,
            None => Err(DriverError::transport(
                TransportReason::Unimplemented,
                format!("{}: no scripted response for {method}", self.host_port),
            )),
        }
    }

    pub(crate) async fn server_streaming(
        &self,
        method: &str,
        request: CallRequest,
        meta: &CallMeta,
    ) -> DriverResult<MockStream> {
        let steps = {
            let mut state = self.script.lock();
            state.calls.push(RecordedCall {
                method: method.to_owned(),
                request,
                meta: meta.clone(),
            });
            state.streams.pop_front()
        };
        match steps {
            Some(steps) => Ok(MockStream {
                steps: steps.into(),
            }),
            None => Err(DriverError::transport(
                TransportReason::Unimplemented,
                format!("{}: no scripted stream for {method}", self.host_port),
            )),
        }
    }
}

/// The receive half of a scripted stream.
pub struct MockStream {
    steps: VecDeque<StreamStep>,
}

impl MockStream {
    pub(crate) async fn message(&mut self) -> DriverResult<Option<StreamResponse>> {
        match self.steps.pop_front() {
            None => Ok(None),
            Some(StreamStep::Message(message)) => Ok(Some(message)),
            Some(StreamStep::Fail(reason, message)) => Err(DriverError::Transport {
                reason,
                message,
            }),
            Some(StreamStep::Hang) => std::future::pending().await,
        }
    }
}

/// A ready envelope with `Success` status.
pub fn success_response(result: Option<Any>) -> CallResponse {
    CallResponse {
        operation: Some(Operation {
            ready: true,
            status: StatusCode::Success as i32,
            issues: vec![],
            result,
        }),
    }
}

/// A ready envelope with the given non-success status.
pub fn status_response(status: StatusCode, issues: Vec<Issue>) -> CallResponse {
    CallResponse {
        operation: Some(Operation {
            ready: true,
            status: status as i32,
            issues,
            result: None,
        }),
    }
}

/// An envelope whose operation was deferred server-side.
pub fn not_ready_response() -> CallResponse {
    CallResponse {
        operation: Some(Operation {
            ready: false,
            status: StatusCode::Unspecified as i32,
            issues: vec![],
            result: None,
        }),
    }
}

#[cfg(test)]
pub(crate) fn mock_conn(host_port: &str, state: crate::conn::ConnState) -> Arc<crate::conn::Conn> {
    use crate::conn::{Conn, RawChannel};
    use crate::endpoint::Endpoint;

    let network = MockNetwork::new();
    network.add_endpoint(host_port);
    let channel = network.dial(host_port).expect("mock dial");
    let (host, port) = host_port.rsplit_once(':').expect("host:port");
    let conn = Arc::new(Conn::new(
        Endpoint::new(host, port.parse().expect("port")),
        RawChannel::Mock(channel),
    ));
    conn.runtime().set_state(state);
    conn
}
