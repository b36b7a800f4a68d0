//! The operation envelope shared by every unary and streaming RPC.

/// Terminal status of a server-side operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Unspecified = 0,
    Success = 1,
    BadRequest = 2,
    Unauthorized = 3,
    InternalError = 4,
    Aborted = 5,
    Unavailable = 6,
    Overloaded = 7,
    SchemeError = 8,
    GenericError = 9,
    Timeout = 10,
    PreconditionFailed = 11,
    NotFound = 12,
    AlreadyExists = 13,
    SessionExpired = 14,
    Cancelled = 15,
    Undetermined = 16,
    Unsupported = 17,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

/// Structured diagnostic attached to an envelope. Issues nest.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Issue {
    /// Numeric severity, 0 = fatal .. 3 = info. Carried opaque.
    #[prost(uint32, tag = "1")]
    pub severity: u32,
    #[prost(uint32, tag = "2")]
    pub code: u32,
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "4")]
    pub issues: ::prost::alloc::vec::Vec<Issue>,
}

/// Server-side execution hints attached to a request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationParams {
    /// Soft deadline: the server fails the operation with `Timeout` once
    /// this much time has passed.
    #[prost(message, optional, tag = "1")]
    pub operation_timeout: ::core::option::Option<::prost_types::Duration>,
    /// Hard deadline: the server cancels the operation outright.
    #[prost(message, optional, tag = "2")]
    pub cancel_after: ::core::option::Option<::prost_types::Duration>,
}

/// The result envelope carried by every unary response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Operation {
    /// False when the server chose to run the operation asynchronously and
    /// only its id is available so far.
    #[prost(bool, tag = "1")]
    pub ready: bool,
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<Issue>,
    /// Method-specific result payload.
    #[prost(message, optional, tag = "4")]
    pub result: ::core::option::Option<::prost_types::Any>,
}

/// Generic unary request container: hint block plus the method payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallRequest {
    #[prost(message, optional, tag = "1")]
    pub params: ::core::option::Option<OperationParams>,
    #[prost(message, optional, tag = "2")]
    pub payload: ::core::option::Option<::prost_types::Any>,
}

/// Generic unary response container.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallResponse {
    #[prost(message, optional, tag = "1")]
    pub operation: ::core::option::Option<Operation>,
}

/// One message of a server-streaming RPC.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub issues: ::prost::alloc::vec::Vec<Issue>,
    #[prost(message, optional, tag = "3")]
    pub payload: ::core::option::Option<::prost_types::Any>,
}
