//! The raw RPC exchange under the call path.
//!
//! Everything above this module speaks [`CallRequest`]/[`CallResponse`]
//! envelopes and [`CallMeta`]; this module lowers them onto a real gRPC
//! channel or onto the scripted mock network.

pub(crate) mod grpc;
pub mod mock;

use meridian_proto::Any;
use meridian_proto::operations::{CallRequest, CallResponse, StreamResponse};

use crate::conn::RawChannel;
use crate::errors::{DriverError, DriverResult, TransportReason};
use crate::meta::CallMeta;

/// Cap on a single received stream message.
pub(crate) const MAX_STREAM_MESSAGE_BYTES: usize = 50 * 1024 * 1024;

/// One synchronous unary exchange. Cancellation and deadlines are the
/// caller's job: the returned future is raced against the call context
/// and simply dropped on expiry, which aborts the underlying RPC.
pub(crate) async fn unary(
    channel: &RawChannel,
    method: &str,
    request: CallRequest,
    meta: &CallMeta,
) -> DriverResult<CallResponse> {
    match channel {
        RawChannel::Grpc(channel) => grpc::unary(channel.clone(), method, request, meta).await,
        RawChannel::Mock(channel) => channel.endpoint().unary(method, request, meta).await,
    }
}

/// Open a server-streaming exchange: the request is sent once and the send
/// direction is half-closed before this returns.
pub(crate) async fn server_streaming(
    channel: &RawChannel,
    method: &str,
    request: CallRequest,
    meta: &CallMeta,
) -> DriverResult<MessageStream> {
    match channel {
        RawChannel::Grpc(channel) => {
            let streaming = grpc::server_streaming(channel.clone(), method, request, meta).await?;
            Ok(MessageStream::Grpc(streaming))
        }
        RawChannel::Mock(channel) => {
            let stream = channel.endpoint().server_streaming(method, request, meta).await?;
            Ok(MessageStream::Mock(stream))
        }
    }
}

/// The receive half of a server stream.
pub(crate) enum MessageStream {
    Grpc(tonic::Streaming<StreamResponse>),
    Mock(mock::MockStream),
}

impl MessageStream {
    /// Next message; `Ok(None)` is the end-of-stream sentinel.
    pub(crate) async fn message(&mut self) -> DriverResult<Option<StreamResponse>> {
        match self {
            MessageStream::Grpc(streaming) => {
                streaming.message().await.map_err(DriverError::from)
            }
            MessageStream::Mock(stream) => stream.message().await,
        }
    }
}

/// Classify a unary response envelope into its result payload.
pub(crate) fn envelope_result(response: CallResponse) -> DriverResult<Option<Any>> {
    let Some(operation) = response.operation else {
        return Err(DriverError::transport(
            TransportReason::Internal,
            "response envelope is missing its operation",
        ));
    };
    if !operation.ready {
        return Err(DriverError::OperationNotReady);
    }
    let status = operation.status();
    if !status.is_success() {
        return Err(DriverError::Operation {
            status,
            issues: operation.issues,
        });
    }
    Ok(operation.result)
}
