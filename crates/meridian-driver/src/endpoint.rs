//! Endpoint identity and ordering.

use std::cmp::Ordering;

use meridian_proto::discovery::EndpointInfo;

use crate::errors::{DriverError, DriverResult};

/// A reachable database node. Identity is `(address, port)`; the load
/// factor and locality flag are metadata that may change between
/// discovery cycles without changing identity.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub load_factor: f32,
    pub local: bool,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Endpoint {
            address: address.into(),
            port,
            load_factor: 0.0,
            local: false,
        }
    }

    /// The `(address, port)` identity key used by the cluster registry and
    /// the reconciliation sort.
    pub fn key(&self) -> (&str, u16) {
        (&self.address, self.port)
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Whether the non-identity metadata differs, for the sorted-merge
    /// diff's update detection.
    pub(crate) fn metadata_differs(&self, other: &Endpoint) -> bool {
        self.load_factor != other.load_factor || self.local != other.local
    }

    /// Fold a discovery listing entry into an endpoint, deciding locality
    /// by comparing the node's datacenter label against the answering
    /// node's own.
    pub(crate) fn from_info(info: &EndpointInfo, self_location: &str) -> Self {
        Endpoint {
            address: info.address.clone(),
            port: info.port as u16,
            load_factor: info.load_factor,
            local: !info.location.is_empty() && info.location == self_location,
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Endpoint {}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Split a `host:port` bootstrap address.
pub(crate) fn parse_host_port(addr: &str) -> DriverResult<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| DriverError::InvalidConfig(format!("address {addr:?} is missing a port")))?;
    if host.is_empty() {
        return Err(DriverError::InvalidConfig(format!(
            "address {addr:?} is missing a host"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidConfig(format!("address {addr:?} has an invalid port")))?;
    Ok((host.to_owned(), port))
}
