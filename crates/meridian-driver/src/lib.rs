//! Cluster-aware RPC dispatch core of the Meridian client driver.
//!
//! [`Driver::dial`] turns a logical database address into a pool of live
//! gRPC channels spread across the cluster's endpoints, keeps that pool in
//! sync through periodic discovery, and executes unary
//! ([`Driver::call`]) and server-streaming ([`Driver::stream_read`])
//! operations over it, choosing a connection per call according to the
//! configured balancing policy.
//!
//! Per-service client stubs build on top of this crate; they provide the
//! request/response message types while the driver owns endpoint
//! discovery, balancing, deadlines, metadata and the error taxonomy.

pub mod balancer;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod meta;
pub mod operation;
pub mod trace;
pub mod transport;

mod cluster;
mod conn;
mod dialer;
mod discovery;
mod driver;
mod endpoint;
mod repeater;

pub use cluster::ClusterStats;
pub use config::{
    BalancingConfig, BalancingMethod, ContextDeadlineMapping, DiscoveryInterval, DriverConfig,
};
pub use conn::{Conn, ConnState, RuntimeStats};
pub use credentials::{AccessTokenCredentials, AnonymousCredentials, Credentials};
pub use driver::Driver;
pub use endpoint::Endpoint;
pub use errors::{DriverError, DriverResult, TransportReason};
pub use meta::CallMeta;
pub use operation::{Operation, StreamEvent, StreamOperation, TypedOperation, TypedStreamRead};
pub use trace::DriverTrace;
pub use transport::mock::{MockEndpoint, MockNetwork, StreamScript};

// Re-exported so callers do not need a direct dependency for the common
// types that appear in this crate's public API.
pub use meridian_cancel::{CancellationToken, CancellationTokenSource, Context};
pub use meridian_proto::operations::{Issue, StatusCode};
