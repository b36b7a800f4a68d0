//! Driver configuration.

use std::sync::Arc;
use std::time::Duration;

use tonic::transport::ClientTlsConfig;

use crate::credentials::{AnonymousCredentials, Credentials};
use crate::errors::{DriverError, DriverResult};
use crate::trace::DriverTrace;
use crate::transport::mock::MockNetwork;

pub(crate) const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// How a context deadline maps onto server-side operation hints when no
/// explicit hint is configured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextDeadlineMapping {
    /// Never derive hints from the context.
    None,
    /// Derive the server's soft deadline from the context deadline.
    #[default]
    OperationTimeout,
    /// Derive the server's hard cancellation hint from the context
    /// deadline.
    OperationCancelAfter,
}

/// Cadence of background endpoint discovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiscoveryInterval {
    /// Once a minute.
    #[default]
    Default,
    /// No background refresh; the driver stays on its bootstrap endpoint.
    Disabled,
    /// A custom interval; zero falls back to the default.
    Every(Duration),
}

impl DiscoveryInterval {
    pub(crate) fn effective(self) -> Option<Duration> {
        match self {
            DiscoveryInterval::Default => Some(DEFAULT_DISCOVERY_INTERVAL),
            DiscoveryInterval::Disabled => None,
            DiscoveryInterval::Every(interval) if interval.is_zero() => {
                Some(DEFAULT_DISCOVERY_INTERVAL)
            }
            DiscoveryInterval::Every(interval) => Some(interval),
        }
    }
}

/// Which balancing strategy picks a conn per call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BalancingMethod {
    RoundRobin,
    #[default]
    PowerOfTwoChoices,
}

/// Knobs of the power-of-two-choices criterion.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BalancingConfig {
    /// Bias the criterion against non-local conns.
    pub prefer_local: bool,
    /// Penalize conns whose windowed average latency reaches this
    /// threshold.
    pub op_time_threshold: Option<Duration>,
}

/// Everything [`Driver::dial`] needs besides the bootstrap address.
///
/// [`Driver::dial`]: crate::Driver::dial
#[derive(Clone)]
pub struct DriverConfig {
    database: String,
    credentials: Arc<dyn Credentials>,
    request_timeout: Option<Duration>,
    stream_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    operation_cancel_after: Option<Duration>,
    context_deadline_mapping: ContextDeadlineMapping,
    discovery_interval: DiscoveryInterval,
    balancing_method: BalancingMethod,
    balancing_config: BalancingConfig,
    prefer_local_endpoints: bool,
    connect_timeout: Option<Duration>,
    /// Transport keepalive. Passed through unclamped; the transport may
    /// negotiate a larger interval if the value is too small.
    keepalive: Option<Duration>,
    tls: Option<ClientTlsConfig>,
    trace: DriverTrace,
    mock_network: Option<MockNetwork>,
}

impl DriverConfig {
    pub fn new(database: impl Into<String>) -> Self {
        DriverConfig {
            database: database.into(),
            credentials: Arc::new(AnonymousCredentials),
            request_timeout: None,
            stream_timeout: None,
            operation_timeout: None,
            operation_cancel_after: None,
            context_deadline_mapping: ContextDeadlineMapping::default(),
            discovery_interval: DiscoveryInterval::default(),
            balancing_method: BalancingMethod::default(),
            balancing_config: BalancingConfig::default(),
            prefer_local_endpoints: false,
            connect_timeout: None,
            keepalive: None,
            tls: None,
            trace: DriverTrace::default(),
            mock_network: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Wall-clock cap per unary call.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Wall-clock cap per stream lifetime.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    /// Server-side soft deadline hint attached to every operation.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Server-side hard cancellation hint attached to every operation.
    pub fn with_operation_cancel_after(mut self, after: Duration) -> Self {
        self.operation_cancel_after = Some(after);
        self
    }

    pub fn with_context_deadline_mapping(mut self, mapping: ContextDeadlineMapping) -> Self {
        self.context_deadline_mapping = mapping;
        self
    }

    pub fn with_discovery_interval(mut self, interval: DiscoveryInterval) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn with_balancing_method(mut self, method: BalancingMethod) -> Self {
        self.balancing_method = method;
        self
    }

    pub fn with_balancing_config(mut self, config: BalancingConfig) -> Self {
        self.balancing_config = config;
        self
    }

    /// Split the balancer by locality: local endpoints serve as long as
    /// any of them is online.
    pub fn with_prefer_local_endpoints(mut self) -> Self {
        self.prefer_local_endpoints = true;
        self
    }

    /// Per-dial connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }

    /// TLS settings; without them the driver connects in the clear.
    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_trace(mut self, trace: DriverTrace) -> Self {
        self.trace = trace;
        self
    }

    /// Resolve dials against a scripted in-process network instead of the
    /// real transport.
    pub fn with_mock_network(mut self, network: MockNetwork) -> Self {
        self.mock_network = Some(network);
        self
    }

    pub(crate) fn validate(&self) -> DriverResult<()> {
        if self.database.is_empty() {
            return Err(DriverError::InvalidConfig(
                "database must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn database(&self) -> &str {
        &self.database
    }

    pub(crate) fn credentials(&self) -> Arc<dyn Credentials> {
        self.credentials.clone()
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub(crate) fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout
    }

    pub(crate) fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    pub(crate) fn operation_cancel_after(&self) -> Option<Duration> {
        self.operation_cancel_after
    }

    pub(crate) fn context_deadline_mapping(&self) -> ContextDeadlineMapping {
        self.context_deadline_mapping
    }

    pub(crate) fn discovery_interval(&self) -> DiscoveryInterval {
        self.discovery_interval
    }

    pub(crate) fn balancing_method(&self) -> BalancingMethod {
        self.balancing_method
    }

    pub(crate) fn balancing_config(&self) -> &BalancingConfig {
        &self.balancing_config
    }

    pub(crate) fn prefer_local_endpoints(&self) -> bool {
        self.prefer_local_endpoints
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub(crate) fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }

    pub(crate) fn tls(&self) -> Option<&ClientTlsConfig> {
        self.tls.as_ref()
    }

    pub(crate) fn trace(&self) -> &DriverTrace {
        &self.trace
    }

    pub(crate) fn mock_network(&self) -> Option<&MockNetwork> {
        self.mock_network.as_ref()
    }
}

impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_timeout = |t: Option<Duration>| {
            t.map(|t| humantime::format_duration(t).to_string())
                .unwrap_or_else(|| "off".to_owned())
        };
        f.debug_struct("DriverConfig")
            .field("database", &self.database)
            .field("request_timeout", &fmt_timeout(self.request_timeout))
            .field("stream_timeout", &fmt_timeout(self.stream_timeout))
            .field("operation_timeout", &fmt_timeout(self.operation_timeout))
            .field(
                "operation_cancel_after",
                &fmt_timeout(self.operation_cancel_after),
            )
            .field("context_deadline_mapping", &self.context_deadline_mapping)
            .field("discovery_interval", &self.discovery_interval)
            .field("balancing_method", &self.balancing_method)
            .field("balancing_config", &self.balancing_config)
            .field("prefer_local_endpoints", &self.prefer_local_endpoints)
            .field("connect_timeout", &fmt_timeout(self.connect_timeout))
            .field("keepalive", &fmt_timeout(self.keepalive))
            .field("tls", &self.tls.is_some())
            .field("mock_network", &self.mock_network.is_some())
            .finish()
    }
}
