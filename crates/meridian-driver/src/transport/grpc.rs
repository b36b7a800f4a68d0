//! tonic-backed transport.

use http::uri::PathAndQuery;
use tonic::client::Grpc;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tonic_prost::ProstCodec;

use meridian_proto::operations::{CallRequest, CallResponse, StreamResponse};

use super::MAX_STREAM_MESSAGE_BYTES;
use crate::errors::{DriverError, DriverResult, TransportReason};
use crate::meta::{AUTH_TICKET_HEADER, CallMeta, DATABASE_HEADER};

pub(crate) async fn unary(
    channel: Channel,
    method: &str,
    request: CallRequest,
    meta: &CallMeta,
) -> DriverResult<CallResponse> {
    let mut grpc = Grpc::new(channel);
    grpc.ready().await.map_err(not_ready)?;
    let codec: ProstCodec<CallRequest, CallResponse> = ProstCodec::default();
    let response = grpc
        .unary(request_with_meta(request, meta)?, path(method)?, codec)
        .await?;
    Ok(response.into_inner())
}

pub(crate) async fn server_streaming(
    channel: Channel,
    method: &str,
    request: CallRequest,
    meta: &CallMeta,
) -> DriverResult<tonic::Streaming<StreamResponse>> {
    let mut grpc = Grpc::new(channel).max_decoding_message_size(MAX_STREAM_MESSAGE_BYTES);
    grpc.ready().await.map_err(not_ready)?;
    let codec: ProstCodec<CallRequest, StreamResponse> = ProstCodec::default();
    let response = grpc
        .server_streaming(request_with_meta(request, meta)?, path(method)?, codec)
        .await?;
    Ok(response.into_inner())
}

fn not_ready(err: tonic::transport::Error) -> DriverError {
    DriverError::transport(TransportReason::Unavailable, err.to_string())
}

fn path(method: &str) -> DriverResult<PathAndQuery> {
    method
        .parse()
        .map_err(|_| DriverError::InvalidConfig(format!("invalid method path {method:?}")))
}

fn request_with_meta(
    request: CallRequest,
    meta: &CallMeta,
) -> DriverResult<tonic::Request<CallRequest>> {
    let mut request = tonic::Request::new(request);
    let metadata = request.metadata_mut();
    metadata.insert(DATABASE_HEADER, ascii(&meta.database)?);
    if let Some(token) = &meta.auth_token {
        metadata.insert(AUTH_TICKET_HEADER, ascii(token)?);
    }
    Ok(request)
}

fn ascii(value: &str) -> DriverResult<MetadataValue<Ascii>> {
    MetadataValue::try_from(value)
        .map_err(|_| DriverError::InvalidConfig(format!("metadata value {value:?} is not ASCII")))
}
