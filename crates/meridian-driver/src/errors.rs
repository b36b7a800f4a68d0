//! The driver's error taxonomy.
//!
//! The driver retries nothing internally: every error is surfaced to the
//! caller and higher layers (the per-service clients) decide on retry. The
//! only error swallowed here is a failed background discovery tick, which
//! is logged and leaves the previous endpoint set intact.

use meridian_cancel::DoneReason;
use meridian_proto::operations::{Issue, StatusCode};

pub type DriverResult<T> = Result<T, DriverError>;

/// Reason classes for failures below the operation envelope, mapped from
/// the gRPC status code of the underlying transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportReason {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl From<tonic::Code> for TransportReason {
    fn from(code: tonic::Code) -> Self {
        use tonic::Code;
        match code {
            Code::Cancelled => TransportReason::Cancelled,
            Code::InvalidArgument => TransportReason::InvalidArgument,
            Code::DeadlineExceeded => TransportReason::DeadlineExceeded,
            Code::NotFound => TransportReason::NotFound,
            Code::AlreadyExists => TransportReason::AlreadyExists,
            Code::PermissionDenied => TransportReason::PermissionDenied,
            Code::ResourceExhausted => TransportReason::ResourceExhausted,
            Code::FailedPrecondition => TransportReason::FailedPrecondition,
            Code::Aborted => TransportReason::Aborted,
            Code::OutOfRange => TransportReason::OutOfRange,
            Code::Unimplemented => TransportReason::Unimplemented,
            Code::Internal => TransportReason::Internal,
            Code::Unavailable => TransportReason::Unavailable,
            Code::DataLoss => TransportReason::DataLoss,
            Code::Unauthenticated => TransportReason::Unauthenticated,
            Code::Ok | Code::Unknown => TransportReason::Unknown,
        }
    }
}

/// Everything a driver entry point can fail with.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The driver (or its cluster) has been closed.
    #[error("driver is closed")]
    Closed,

    /// The server chose to execute the operation asynchronously and the
    /// envelope came back with `ready = false`. The driver does not poll;
    /// this is terminal here.
    #[error("operation is not ready")]
    OperationNotReady,

    /// Failure below the envelope: the RPC itself did not complete.
    #[error("transport error: {reason:?}: {message}")]
    Transport {
        reason: TransportReason,
        message: String,
    },

    /// The server completed the RPC but the envelope carries a
    /// non-success status.
    #[error("operation failed: {status:?}: {}", format_issues(.issues))]
    Operation {
        status: StatusCode,
        issues: Vec<Issue>,
    },

    /// The call context's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The call context was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The credentials provider failed; its error is carried verbatim.
    #[error("credentials: {0}")]
    Credentials(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DriverError {
    pub(crate) fn transport(reason: TransportReason, message: impl Into<String>) -> Self {
        DriverError::Transport {
            reason,
            message: message.into(),
        }
    }

    /// Whether this error says something about the health of the endpoint
    /// it was observed on. Permanent API errors do not: a `NotFound` from
    /// a perfectly healthy node must not poison its error rate.
    pub fn is_timeout_class(&self) -> bool {
        match self {
            DriverError::Transport { .. } => true,
            DriverError::DeadlineExceeded | DriverError::Cancelled => true,
            DriverError::Operation { status, .. } => {
                matches!(status, StatusCode::Timeout | StatusCode::Cancelled)
            }
            _ => false,
        }
    }
}

impl From<DoneReason> for DriverError {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::Cancelled => DriverError::Cancelled,
            DoneReason::DeadlineExceeded => DriverError::DeadlineExceeded,
        }
    }
}

impl From<tonic::Status> for DriverError {
    fn from(status: tonic::Status) -> Self {
        DriverError::Transport {
            reason: status.code().into(),
            message: status.message().to_owned(),
        }
    }
}

fn format_issues(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "no issues".to_owned();
    }
    issues
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
