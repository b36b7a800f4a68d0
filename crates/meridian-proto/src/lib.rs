//! Message types for the Meridian wire protocol.
//!
//! These structs are hand-maintained prost messages equivalent to what
//! `tonic-build` would generate from the service protos. They are kept in
//! tree so the driver builds without a protoc toolchain and so envelope
//! evolution is reviewed like any other code change.

pub mod discovery;
pub mod operations;

pub use prost_types::Any;

/// Encode `msg` into an [`Any`] under the given type URL.
pub fn any_from<M: prost::Message>(type_url: impl Into<String>, msg: &M) -> Any {
    Any {
        type_url: type_url.into(),
        value: msg.encode_to_vec(),
    }
}

/// Decode an [`Any`] payload into `M`, ignoring the type URL.
///
/// Callers that care about the URL check it before decoding; the driver
/// itself treats results as opaque bytes addressed by the operation type.
pub fn any_to<M: prost::Message + Default>(any: &Any) -> Result<M, prost::DecodeError> {
    M::decode(any.value.as_slice())
}

/// Lossy conversion to the protobuf well-known `Duration`.
pub fn proto_duration(d: std::time::Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

/// gRPC method paths served by the Meridian endpoints.
pub mod method {
    pub const LIST_ENDPOINTS: &str = "/meridian.discovery.v1.DiscoveryService/ListEndpoints";
}

/// `Any` type URLs for the messages this crate defines.
pub mod type_url {
    pub const LIST_ENDPOINTS_REQUEST: &str =
        "type.meridianapis.io/meridian.discovery.v1.ListEndpointsRequest";
    pub const LIST_ENDPOINTS_RESULT: &str =
        "type.meridianapis.io/meridian.discovery.v1.ListEndpointsResult";
}
