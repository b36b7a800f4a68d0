//! Paired begin/end trace hooks.
//!
//! The driver reports its lifecycle to an external sink through optional
//! hooks: each begin hook receives a start info and returns the closure to
//! invoke when the step finishes. Begin infos carry the *caller's*
//! deadline, not the driver-tightened one, so a sink can attribute
//! slowness to the right deadline. Alongside the hooks the driver emits
//! `tracing` events; the hooks exist for sinks that want structured
//! pairing without subscribing globally.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian_proto::operations::OperationParams;

/// End half of a paired hook.
pub type Done<T> = Box<dyn FnOnce(T) + Send>;

/// Begin half of a paired hook.
pub type Hook<S, D> = Arc<dyn Fn(S) -> Done<D> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct GetConnStart {
    /// The caller's deadline as of entering the call path.
    pub deadline: Option<Instant>,
}

#[derive(Clone, Debug)]
pub struct GetConnDone {
    pub endpoint: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OperationStart {
    pub method: &'static str,
    pub endpoint: String,
    pub deadline: Option<Instant>,
    /// The server-side hints attached to this call, if any.
    pub params: Option<OperationParams>,
}

#[derive(Clone, Debug)]
pub struct OperationDone {
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StreamStart {
    pub method: &'static str,
    pub endpoint: String,
}

#[derive(Clone, Debug)]
pub struct StreamRecv {
    pub method: &'static str,
}

#[derive(Clone, Debug)]
pub struct StreamDone {
    /// `None` for a clean end-of-stream; the sentinel is hidden here even
    /// though the stream's process callback observes it.
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DiscoveryStart {
    pub database: String,
    pub seed: String,
}

#[derive(Clone, Debug)]
pub struct DiscoveryDone {
    pub endpoints: Option<usize>,
    pub error: Option<String>,
}

/// The hook set. Every slot defaults to "not traced".
#[derive(Clone, Default)]
pub struct DriverTrace {
    pub get_conn: Option<Hook<GetConnStart, GetConnDone>>,
    pub operation: Option<Hook<OperationStart, OperationDone>>,
    pub stream: Option<Hook<StreamStart, StreamDone>>,
    pub stream_recv: Option<Arc<dyn Fn(&StreamRecv) + Send + Sync>>,
    pub discovery: Option<Hook<DiscoveryStart, DiscoveryDone>>,
}

impl DriverTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get_conn(
        mut self,
        hook: impl Fn(GetConnStart) -> Done<GetConnDone> + Send + Sync + 'static,
    ) -> Self {
        self.get_conn = Some(Arc::new(hook));
        self
    }

    pub fn with_operation(
        mut self,
        hook: impl Fn(OperationStart) -> Done<OperationDone> + Send + Sync + 'static,
    ) -> Self {
        self.operation = Some(Arc::new(hook));
        self
    }

    pub fn with_stream(
        mut self,
        hook: impl Fn(StreamStart) -> Done<StreamDone> + Send + Sync + 'static,
    ) -> Self {
        self.stream = Some(Arc::new(hook));
        self
    }

    pub fn with_stream_recv(mut self, hook: impl Fn(&StreamRecv) + Send + Sync + 'static) -> Self {
        self.stream_recv = Some(Arc::new(hook));
        self
    }

    pub fn with_discovery(
        mut self,
        hook: impl Fn(DiscoveryStart) -> Done<DiscoveryDone> + Send + Sync + 'static,
    ) -> Self {
        self.discovery = Some(Arc::new(hook));
        self
    }

    pub(crate) fn on_get_conn(&self, info: GetConnStart) -> Option<Done<GetConnDone>> {
        self.get_conn.as_ref().map(|hook| hook(info))
    }

    pub(crate) fn on_operation(&self, info: OperationStart) -> Option<Done<OperationDone>> {
        self.operation.as_ref().map(|hook| hook(info))
    }

    pub(crate) fn on_stream(&self, info: StreamStart) -> Option<Done<StreamDone>> {
        self.stream.as_ref().map(|hook| hook(info))
    }

    pub(crate) fn on_stream_recv(&self, info: &StreamRecv) {
        if let Some(hook) = &self.stream_recv {
            hook(info);
        }
    }

    pub(crate) fn on_discovery(&self, info: DiscoveryStart) -> Option<Done<DiscoveryDone>> {
        self.discovery.as_ref().map(|hook| hook(info))
    }
}

impl std::fmt::Debug for DriverTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverTrace")
            .field("get_conn", &self.get_conn.is_some())
            .field("operation", &self.operation.is_some())
            .field("stream", &self.stream.is_some())
            .field("stream_recv", &self.stream_recv.is_some())
            .field("discovery", &self.discovery.is_some())
            .finish()
    }
}
