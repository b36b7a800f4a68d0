//! The public driver: dial, call, stream read, close.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use meridian_cancel::Context;
use meridian_proto::operations::{CallRequest, OperationParams};
use meridian_proto::proto_duration;

use crate::balancer::{self, SingleConn};
use crate::cluster::{Cluster, ClusterStats};
use crate::config::{ContextDeadlineMapping, DriverConfig};
use crate::conn::Conn;
use crate::dialer::Dialer;
use crate::discovery::{diff_endpoints, discover};
use crate::endpoint::{Endpoint, parse_host_port};
use crate::errors::{DriverError, DriverResult};
use crate::meta::{CallMeta, Meta};
use crate::operation::{Operation, StreamEvent, StreamOperation};
use crate::repeater::Repeater;
use crate::trace::{
    DiscoveryDone, DiscoveryStart, DriverTrace, GetConnDone, GetConnStart, OperationDone,
    OperationStart, StreamDone, StreamRecv, StreamStart,
};
use crate::transport;

/// A handle onto one dialed database. Cheap to clone; all clones share the
/// same cluster and close together.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    config: DriverConfig,
    meta: Meta,
    cluster: Arc<Cluster>,
    repeater: Option<Repeater>,
    closed: AtomicBool,
}

impl Driver {
    /// Connect to the database behind `addr` (`host:port`).
    ///
    /// Bootstraps a connection to the seed, lists the cluster's endpoints
    /// (unless discovery is disabled, in which case the seed itself is the
    /// cluster), populates the conn pool and starts the periodic
    /// re-discovery worker.
    pub async fn dial(ctx: &Context, addr: &str, config: DriverConfig) -> DriverResult<Driver> {
        config.validate()?;
        let (host, port) = parse_host_port(addr)?;
        let dialer = Arc::new(Dialer::from_config(&config));
        let meta = Meta::new(config.database().to_owned(), config.credentials());

        let inner = match config.discovery_interval().effective() {
            None => {
                // Discovery disabled: one conn to the seed, no refresh.
                let cluster = Cluster::new(dialer, Arc::new(SingleConn::new()));
                let seed = Endpoint {
                    address: host,
                    port,
                    load_factor: 0.0,
                    local: true,
                };
                cluster.insert(ctx, seed).await?;
                DriverInner {
                    meta,
                    cluster,
                    repeater: None,
                    closed: AtomicBool::new(false),
                    config,
                }
            }
            Some(interval) => {
                let balancer = balancer::for_config(
                    config.balancing_method(),
                    config.balancing_config(),
                    config.prefer_local_endpoints(),
                );
                let cluster = Cluster::new(dialer.clone(), balancer);

                // Initial synchronous discovery over a throwaway channel
                // to the seed. A failure here fails the dial.
                let trace = config.trace().clone();
                let done = trace.on_discovery(DiscoveryStart {
                    database: meta.database().to_owned(),
                    seed: format!("{host}:{port}"),
                });
                let discovered = discover(ctx, &dialer, &meta, &host, port).await;
                if let Some(done) = done {
                    done(discovery_done(&discovered));
                }
                let endpoints = discovered?;
                for endpoint in &endpoints {
                    if let Err(err) = cluster.insert(ctx, endpoint.clone()).await {
                        warn!(endpoint = %endpoint, error = %err, "bootstrap insert failed");
                    }
                }

                let repeater = Repeater::spawn(
                    "discovery",
                    interval,
                    discovery_task(
                        cluster.clone(),
                        dialer,
                        meta.clone(),
                        trace,
                        (host, port),
                        Arc::new(Mutex::new(endpoints)),
                    ),
                );
                DriverInner {
                    meta,
                    cluster,
                    repeater: Some(repeater),
                    closed: AtomicBool::new(false),
                    config,
                }
            }
        };
        Ok(Driver {
            inner: Arc::new(inner),
        })
    }

    /// Execute one unary operation.
    pub async fn call<O: Operation>(&self, ctx: &Context, op: &mut O) -> DriverResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        let config = &self.inner.config;
        let trace = config.trace();

        // The raw caller context is preserved for tracing; the call
        // context below may be tightened by the request timeout.
        let caller_deadline = ctx.deadline();
        let ctx = match config.request_timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };
        let params = operation_params(config, &ctx);
        let call_meta = self.inner.meta.call_meta(&ctx).await?;

        let get_done = trace.on_get_conn(GetConnStart {
            deadline: caller_deadline,
        });
        let got = self.inner.cluster.get(&ctx).await;
        if let Some(done) = get_done {
            done(GetConnDone {
                endpoint: got.as_ref().ok().map(|conn| conn.endpoint().host_port()),
                error: got.as_ref().err().map(ToString::to_string),
            });
        }
        let conn = got?;

        let method = op.method();
        let request = CallRequest {
            params,
            payload: Some(op.payload()),
        };

        let start = Instant::now();
        conn.runtime().operation_start(start);
        let op_done = trace.on_operation(OperationStart {
            method,
            endpoint: conn.endpoint().host_port(),
            deadline: caller_deadline,
            params: request.params.clone(),
        });

        let outcome = async {
            let response = ctx
                .run_until_done(transport::unary(conn.channel(), method, request, &call_meta))
                .await
                .map_err(DriverError::from)??;
            op.handle_result(transport::envelope_result(response)?)
        }
        .await;

        let end = Instant::now();
        conn.runtime()
            .operation_done(start, end, outcome.as_ref().err());
        if let Some(done) = op_done {
            done(OperationDone {
                elapsed: end.saturating_duration_since(start),
                error: outcome.as_ref().err().map(ToString::to_string),
            });
        }
        if let Err(err) = &outcome {
            debug!(method, endpoint = %conn.endpoint(), error = %err, "unary call failed");
        }
        outcome
    }

    /// Execute one server-streaming operation.
    ///
    /// Returns once the request has been sent and the send half closed;
    /// the receive loop runs on a background worker that feeds
    /// `op.on_event` one event per received message plus exactly one
    /// terminal `Done`. Cancelling `ctx` propagates to the worker.
    pub async fn stream_read<S>(&self, ctx: &Context, mut op: S) -> DriverResult<()>
    where
        S: StreamOperation + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        let config = &self.inner.config;
        let trace = config.trace().clone();

        let caller_deadline = ctx.deadline();
        // Stream-timeout layering; the cancel half is owned by the
        // receive worker once the stream is open.
        let (ctx, cancel_guard) = match config.stream_timeout() {
            Some(timeout) => {
                let (ctx, source) = ctx.with_timeout(timeout).with_cancel();
                (ctx, Some(source))
            }
            None => (ctx.clone(), None),
        };
        let params = operation_params(config, &ctx);

        let sync_part: DriverResult<(Arc<Conn>, CallMeta)> = async {
            let call_meta = self.inner.meta.call_meta(&ctx).await?;
            let get_done = trace.on_get_conn(GetConnStart {
                deadline: caller_deadline,
            });
            let got = self.inner.cluster.get(&ctx).await;
            if let Some(done) = get_done {
                done(GetConnDone {
                    endpoint: got.as_ref().ok().map(|conn| conn.endpoint().host_port()),
                    error: got.as_ref().err().map(ToString::to_string),
                });
            }
            Ok((got?, call_meta))
        }
        .await;
        let (conn, call_meta) = match sync_part {
            Ok(parts) => parts,
            Err(err) => {
                if let Some(guard) = cancel_guard {
                    guard.cancel();
                }
                return Err(err);
            }
        };

        let method = op.method();
        let request = CallRequest {
            params,
            payload: Some(op.payload()),
        };

        let start = Instant::now();
        conn.runtime().stream_start(start);
        let stream_done = trace.on_stream(StreamStart {
            method,
            endpoint: conn.endpoint().host_port(),
        });

        // Open the stream: the request is sent once and the send
        // direction half-closed before this resolves.
        let opened = ctx
            .run_until_done(transport::server_streaming(
                conn.channel(),
                method,
                request,
                &call_meta,
            ))
            .await
            .map_err(DriverError::from)
            .and_then(std::convert::identity);
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                conn.runtime().stream_done(start, Instant::now(), Some(&err));
                if let Some(done) = stream_done {
                    done(StreamDone {
                        error: Some(err.to_string()),
                    });
                }
                if let Some(guard) = cancel_guard {
                    guard.cancel();
                }
                return Err(err);
            }
        };

        // Hand the receive loop, the terminal hooks and the timeout
        // cancel off to a dedicated worker.
        tokio::spawn(async move {
            let mut terminal: Option<DriverError> = None;
            loop {
                conn.runtime().stream_recv(Instant::now());
                trace.on_stream_recv(&StreamRecv { method });
                match ctx.run_until_done(stream.message()).await {
                    Err(reason) => {
                        terminal = Some(reason.into());
                        break;
                    }
                    Ok(Err(err)) => {
                        terminal = Some(err);
                        break;
                    }
                    // End of stream: hidden from runtime and trace, but
                    // surfaced to the process callback as `Done(None)`.
                    Ok(Ok(None)) => break,
                    Ok(Ok(Some(message))) => {
                        let status = message.status();
                        if !status.is_success() {
                            terminal = Some(DriverError::Operation {
                                status,
                                issues: message.issues,
                            });
                            break;
                        }
                        let decoded = match &message.payload {
                            Some(payload) => meridian_proto::any_to::<S::Message>(payload),
                            None => Ok(S::Message::default()),
                        };
                        match decoded {
                            Ok(decoded) => op.on_event(StreamEvent::Message(decoded)),
                            Err(err) => {
                                terminal = Some(DriverError::transport(
                                    crate::errors::TransportReason::Internal,
                                    format!("malformed stream payload: {err}"),
                                ));
                                break;
                            }
                        }
                    }
                }
            }
            conn.runtime()
                .stream_done(start, Instant::now(), terminal.as_ref());
            if let Some(done) = stream_done {
                done(StreamDone {
                    error: terminal.as_ref().map(ToString::to_string),
                });
            }
            if let Some(err) = &terminal {
                debug!(method, endpoint = %conn.endpoint(), error = %err, "stream terminated");
            }
            op.on_event(StreamEvent::Done(terminal));
            if let Some(guard) = cancel_guard {
                guard.cancel();
            }
        });
        Ok(())
    }

    /// Per-endpoint runtime stats.
    pub fn stats(&self, visit: impl FnMut(&ClusterStats)) {
        self.inner.cluster.stats(visit);
    }

    pub fn database(&self) -> &str {
        self.inner.meta.database()
    }

    /// Stop background discovery and close every conn. Idempotent;
    /// subsequent calls on the driver fail fast with
    /// [`DriverError::Closed`].
    pub async fn close(&self) -> DriverResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(repeater) = &self.inner.repeater {
            repeater.stop().await;
        }
        self.inner.cluster.close();
        debug!(database = self.inner.meta.database(), "driver closed");
        Ok(())
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("database", &self.inner.meta.database())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Some(repeater) = &self.repeater {
                repeater.shutdown_now();
            }
            self.cluster.close();
        }
    }
}

/// Resolve the server-side operation hints for one call: explicit
/// configuration wins; otherwise, with a non-none mapping, the hint is
/// derived from the call context's deadline.
fn operation_params(config: &DriverConfig, ctx: &Context) -> Option<OperationParams> {
    let mut operation_timeout = config.operation_timeout();
    let mut cancel_after = config.operation_cancel_after();
    if operation_timeout.is_none() && cancel_after.is_none() {
        if let Some(remaining) = ctx.timeout_remaining(Instant::now()) {
            match config.context_deadline_mapping() {
                ContextDeadlineMapping::None => {}
                ContextDeadlineMapping::OperationTimeout => operation_timeout = Some(remaining),
                ContextDeadlineMapping::OperationCancelAfter => cancel_after = Some(remaining),
            }
        }
    }
    if operation_timeout.is_none() && cancel_after.is_none() {
        return None;
    }
    Some(OperationParams {
        operation_timeout: operation_timeout.map(proto_duration),
        cancel_after: cancel_after.map(proto_duration),
    })
}

fn discovery_done(discovered: &DriverResult<Vec<Endpoint>>) -> DiscoveryDone {
    match discovered {
        Ok(endpoints) => DiscoveryDone {
            endpoints: Some(endpoints.len()),
            error: None,
        },
        Err(err) => DiscoveryDone {
            endpoints: None,
            error: Some(err.to_string()),
        },
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The periodic re-discovery tick: list endpoints, sorted-merge diff
/// against the previous cycle, apply the changes. A failed listing leaves
/// the previous endpoint set intact.
fn discovery_task(
    cluster: Arc<Cluster>,
    dialer: Arc<Dialer>,
    meta: Meta,
    trace: DriverTrace,
    seed: (String, u16),
    prev: Arc<Mutex<Vec<Endpoint>>>,
) -> impl FnMut(Context) -> TaskFuture + Send + 'static {
    move |ctx: Context| {
        let cluster = cluster.clone();
        let dialer = dialer.clone();
        let meta = meta.clone();
        let trace = trace.clone();
        let seed = seed.clone();
        let prev = prev.clone();
        let tick: TaskFuture = Box::pin(async move {
            let done = trace.on_discovery(DiscoveryStart {
                database: meta.database().to_owned(),
                seed: format!("{}:{}", seed.0, seed.1),
            });
            let discovered = discover(&ctx, &dialer, &meta, &seed.0, seed.1).await;
            if let Some(done) = done {
                done(discovery_done(&discovered));
            }
            let next = match discovered {
                Ok(next) => next,
                Err(err) => {
                    warn!(error = %err, "discovery tick failed; keeping previous endpoints");
                    return;
                }
            };

            let current = prev.lock().clone();
            let (mut to_update, mut to_insert, mut to_remove) = (vec![], vec![], vec![]);
            diff_endpoints(
                &current,
                &next,
                |e| to_update.push(e.clone()),
                |e| to_insert.push(e.clone()),
                |e| to_remove.push(e.clone()),
            );
            for endpoint in &to_remove {
                cluster.remove(endpoint);
            }
            for endpoint in &to_update {
                if let Err(err) = cluster.update(&ctx, endpoint.clone()).await {
                    warn!(endpoint = %endpoint, error = %err, "endpoint update failed");
                }
            }
            for endpoint in &to_insert {
                if let Err(err) = cluster.insert(&ctx, endpoint.clone()).await {
                    warn!(endpoint = %endpoint, error = %err, "endpoint insert failed");
                }
            }
            debug!(
                endpoints = next.len(),
                inserted = to_insert.len(),
                updated = to_update.len(),
                removed = to_remove.len(),
                "discovery cycle applied"
            );
            *prev.lock() = next;
        });
        tick
    }
}
