//! Per-request metadata: the database header plus an optional auth ticket.

use std::sync::Arc;

use meridian_cancel::Context;

use crate::credentials::Credentials;
use crate::errors::{DriverError, DriverResult};

pub(crate) const DATABASE_HEADER: &str = "x-meridian-database";
pub(crate) const AUTH_TICKET_HEADER: &str = "x-meridian-auth-ticket";

/// The resolved header set for one call. The transport lowers this into
/// request metadata; the mock transport records it for assertions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallMeta {
    pub database: String,
    pub auth_token: Option<String>,
}

/// Stateless builder of [`CallMeta`] from the configured credentials.
#[derive(Clone)]
pub(crate) struct Meta {
    database: String,
    credentials: Arc<dyn Credentials>,
}

impl Meta {
    pub(crate) fn new(database: String, credentials: Arc<dyn Credentials>) -> Self {
        Meta {
            database,
            credentials,
        }
    }

    pub(crate) fn database(&self) -> &str {
        &self.database
    }

    /// Resolve credentials for one call. The token fetch is bounded by
    /// `ctx`; provider failures propagate unchanged.
    pub(crate) async fn call_meta(&self, ctx: &Context) -> DriverResult<CallMeta> {
        let token = ctx
            .run_until_done(self.credentials.token(ctx))
            .await
            .map_err(DriverError::from)?
            .map_err(DriverError::Credentials)?;
        Ok(CallMeta {
            database: self.database.clone(),
            auth_token: (!token.is_empty()).then_some(token),
        })
    }
}
