//! Endpoint discovery and reconciliation.

use meridian_cancel::Context;
use meridian_proto::discovery::{ListEndpointsRequest, ListEndpointsResult};
use meridian_proto::operations::CallRequest;
use meridian_proto::{any_from, any_to, method, type_url};

use crate::dialer::Dialer;
use crate::endpoint::Endpoint;
use crate::errors::{DriverError, DriverResult, TransportReason};
use crate::meta::Meta;
use crate::transport;

/// One-shot endpoint listing against `seed`.
///
/// Opens a throwaway channel, issues `ListEndpoints` for the configured
/// database and returns the cluster's endpoints sorted by identity. The
/// channel is dropped on exit regardless of outcome.
pub(crate) async fn discover(
    ctx: &Context,
    dialer: &Dialer,
    meta: &Meta,
    seed_host: &str,
    seed_port: u16,
) -> DriverResult<Vec<Endpoint>> {
    let channel = dialer.dial_host_port(ctx, seed_host, seed_port).await?;
    let call_meta = meta.call_meta(ctx).await?;
    let request = CallRequest {
        params: None,
        payload: Some(any_from(
            type_url::LIST_ENDPOINTS_REQUEST,
            &ListEndpointsRequest {
                database: meta.database().to_owned(),
            },
        )),
    };
    let response = ctx
        .run_until_done(transport::unary(
            &channel,
            method::LIST_ENDPOINTS,
            request,
            &call_meta,
        ))
        .await
        .map_err(DriverError::from)??;
    let result = transport::envelope_result(response)?.ok_or_else(|| {
        DriverError::transport(
            TransportReason::Internal,
            "endpoint listing came back without a result",
        )
    })?;
    let listing: ListEndpointsResult = any_to(&result).map_err(|err| {
        DriverError::transport(
            TransportReason::Internal,
            format!("malformed endpoint listing: {err}"),
        )
    })?;
    let mut endpoints: Vec<Endpoint> = listing
        .endpoints
        .iter()
        .map(|info| Endpoint::from_info(info, &listing.self_location))
        .collect();
    endpoints.sort();
    Ok(endpoints)
}

/// Sorted-merge reconciliation of two endpoint lists.
///
/// Both inputs must be sorted by `(address, port)`. Equal keys with
/// changed metadata fire `on_update`; keys only in `next` fire
/// `on_insert`; keys only in `prev` fire `on_remove`.
pub(crate) fn diff_endpoints(
    prev: &[Endpoint],
    next: &[Endpoint],
    mut on_update: impl FnMut(&Endpoint),
    mut on_insert: impl FnMut(&Endpoint),
    mut on_remove: impl FnMut(&Endpoint),
) {
    let mut p = prev.iter().peekable();
    let mut n = next.iter().peekable();
    loop {
        match (p.peek(), n.peek()) {
            (Some(old), Some(new)) => match old.key().cmp(&new.key()) {
                std::cmp::Ordering::Equal => {
                    if old.metadata_differs(new) {
                        on_update(new);
                    }
                    p.next();
                    n.next();
                }
                std::cmp::Ordering::Less => {
                    on_remove(old);
                    p.next();
                }
                std::cmp::Ordering::Greater => {
                    on_insert(new);
                    n.next();
                }
            },
            (Some(old), None) => {
                on_remove(old);
                p.next();
            }
            (None, Some(new)) => {
                on_insert(new);
                n.next();
            }
            (None, None) => break,
        }
    }
}
