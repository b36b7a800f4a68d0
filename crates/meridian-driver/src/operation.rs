//! Driver-opaque representations of unary and streaming operations.
//!
//! The driver never looks inside request or response payloads; a service
//! stub describes its RPC through these seams and the driver supplies
//! balancing, deadlines, metadata and error classification around it.

use std::marker::PhantomData;

use meridian_proto::{Any, any_from, any_to};

use crate::errors::{DriverError, DriverResult, TransportReason};

/// One unary request/response pair.
pub trait Operation: Send {
    /// Full gRPC method path, e.g. `/meridian.table.v1.TableService/Explain`.
    fn method(&self) -> &'static str;

    /// The encoded request payload.
    fn payload(&self) -> Any;

    /// Receive the envelope's result payload. `None` when the server
    /// attached no body; an operation that expects none simply ignores it.
    fn handle_result(&mut self, result: Option<Any>) -> DriverResult<()>;
}

/// A typed [`Operation`] over prost request/response messages, the form
/// the generated service stubs use.
pub struct TypedOperation<Req, Res> {
    method: &'static str,
    request_type_url: &'static str,
    request: Req,
    decode_result: bool,
    response: Option<Res>,
}

impl<Req, Res> TypedOperation<Req, Res>
where
    Req: prost::Message,
    Res: prost::Message + Default,
{
    pub fn new(method: &'static str, request_type_url: &'static str, request: Req) -> Self {
        TypedOperation {
            method,
            request_type_url,
            request,
            decode_result: true,
            response: None,
        }
    }

    /// Skip decoding the result body. The envelope status is still
    /// classified; a body the server sends anyway is ignored.
    pub fn discard_result(mut self) -> Self {
        self.decode_result = false;
        self
    }

    pub fn response(&self) -> Option<&Res> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<Res> {
        self.response.take()
    }
}

impl<Req, Res> Operation for TypedOperation<Req, Res>
where
    Req: prost::Message + Send,
    Res: prost::Message + Default + Send,
{
    fn method(&self) -> &'static str {
        self.method
    }

    fn payload(&self) -> Any {
        any_from(self.request_type_url, &self.request)
    }

    fn handle_result(&mut self, result: Option<Any>) -> DriverResult<()> {
        if !self.decode_result {
            return Ok(());
        }
        let Some(result) = result else {
            return Ok(());
        };
        let response = any_to::<Res>(&result).map_err(|err| {
            DriverError::transport(
                TransportReason::Internal,
                format!("malformed result payload: {err}"),
            )
        })?;
        self.response = Some(response);
        Ok(())
    }
}

/// One event of a server stream as seen by the process callback: every
/// received message in arrival order, then exactly one `Done`.
/// `Done(None)` is the end-of-stream sentinel.
#[derive(Debug)]
pub enum StreamEvent<Res> {
    Message(Res),
    Done(Option<DriverError>),
}

/// A server-streaming RPC and its per-message handler.
pub trait StreamOperation: Send {
    type Message: prost::Message + Default + Send + 'static;

    fn method(&self) -> &'static str;

    fn payload(&self) -> Any;

    /// Invoked by the receive worker, strictly in arrival order.
    fn on_event(&mut self, event: StreamEvent<Self::Message>);
}

/// A typed [`StreamOperation`] funnelling events into a closure.
pub struct TypedStreamRead<Req, Res, F> {
    method: &'static str,
    request_type_url: &'static str,
    request: Req,
    process: F,
    _message: PhantomData<fn() -> Res>,
}

impl<Req, Res, F> TypedStreamRead<Req, Res, F>
where
    Req: prost::Message,
    Res: prost::Message + Default,
    F: FnMut(StreamEvent<Res>),
{
    pub fn new(
        method: &'static str,
        request_type_url: &'static str,
        request: Req,
        process: F,
    ) -> Self {
        TypedStreamRead {
            method,
            request_type_url,
            request,
            process,
            _message: PhantomData,
        }
    }
}

impl<Req, Res, F> StreamOperation for TypedStreamRead<Req, Res, F>
where
    Req: prost::Message + Send,
    Res: prost::Message + Default + Send + 'static,
    F: FnMut(StreamEvent<Res>) + Send,
{
    type Message = Res;

    fn method(&self) -> &'static str {
        self.method
    }

    fn payload(&self) -> Any {
        any_from(self.request_type_url, &self.request)
    }

    fn on_event(&mut self, event: StreamEvent<Res>) {
        (self.process)(event);
    }
}
