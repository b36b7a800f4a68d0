//! Transport channel construction.

use std::time::Duration;

use tonic::transport::{ClientTlsConfig, Endpoint as TonicEndpoint};

use meridian_cancel::Context;

use crate::config::DriverConfig;
use crate::conn::RawChannel;
use crate::errors::{DriverError, DriverResult, TransportReason};
use crate::transport::mock::MockNetwork;

enum DialMode {
    Grpc,
    Mock(MockNetwork),
}

/// Builds one channel per endpoint. With a mock network injected via the
/// configuration, dials resolve against the scripted endpoints instead of
/// the operating system's connectivity.
pub(crate) struct Dialer {
    connect_timeout: Option<Duration>,
    keepalive: Option<Duration>,
    tls: Option<ClientTlsConfig>,
    mode: DialMode,
}

impl Dialer {
    pub(crate) fn from_config(config: &DriverConfig) -> Self {
        Dialer {
            connect_timeout: config.connect_timeout(),
            keepalive: config.keepalive(),
            tls: config.tls().cloned(),
            mode: match config.mock_network() {
                Some(network) => DialMode::Mock(network.clone()),
                None => DialMode::Grpc,
            },
        }
    }

    /// Eagerly connect to `host:port`. The returned channel is only handed
    /// to the cluster once the connection is established, so a conn
    /// entering the balancer is known to have been reachable.
    pub(crate) async fn dial_host_port(
        &self,
        ctx: &Context,
        host: &str,
        port: u16,
    ) -> DriverResult<RawChannel> {
        match &self.mode {
            DialMode::Mock(network) => {
                network.dial(&format!("{host}:{port}")).map(RawChannel::Mock)
            }
            DialMode::Grpc => self.dial_grpc(ctx, host, port).await,
        }
    }

    async fn dial_grpc(&self, ctx: &Context, host: &str, port: u16) -> DriverResult<RawChannel> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let mut endpoint = TonicEndpoint::from_shared(format!("{scheme}://{host}:{port}"))
            .map_err(|err| DriverError::InvalidConfig(err.to_string()))?;
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(keepalive) = self.keepalive {
            // Passed through unclamped; the transport may negotiate a
            // larger interval than a too-small request.
            endpoint = endpoint
                .tcp_keepalive(Some(keepalive))
                .http2_keep_alive_interval(keepalive)
                .keep_alive_while_idle(true);
        }
        if let Some(tls) = &self.tls {
            endpoint = endpoint
                .tls_config(tls.clone())
                .map_err(|err| DriverError::InvalidConfig(err.to_string()))?;
        }
        let channel = ctx
            .run_until_done(endpoint.connect())
            .await
            .map_err(DriverError::from)?
            .map_err(|err| DriverError::transport(TransportReason::Unavailable, err.to_string()))?;
        Ok(RawChannel::Grpc(channel))
    }
}
