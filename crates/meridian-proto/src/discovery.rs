//! Endpoint listing messages served by the discovery service.

/// One reachable database node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndpointInfo {
    #[prost(string, tag = "1")]
    pub address: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    /// Relative load reported by the node, higher is busier.
    #[prost(float, tag = "3")]
    pub load_factor: f32,
    /// Datacenter label. Compared against `ListEndpointsResult::self_location`
    /// to decide locality.
    #[prost(string, tag = "4")]
    pub location: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsRequest {
    #[prost(string, tag = "1")]
    pub database: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsResult {
    #[prost(message, repeated, tag = "1")]
    pub endpoints: ::prost::alloc::vec::Vec<EndpointInfo>,
    /// Location label of the node that answered the listing.
    #[prost(string, tag = "2")]
    pub self_location: ::prost::alloc::string::String,
}
