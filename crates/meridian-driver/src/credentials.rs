//! Credentials providers.
//!
//! A provider produces the auth token attached to every call. Token
//! production may block on I/O (file reads, token-exchange endpoints); it
//! is always bounded by the caller's context. Provider failures propagate
//! to the caller verbatim, wrapped in [`DriverError::Credentials`].
//!
//! [`DriverError::Credentials`]: crate::errors::DriverError::Credentials

use async_trait::async_trait;

use meridian_cancel::Context;

pub type CredentialsError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait Credentials: Send + Sync {
    /// The token for one call. An empty token means "no auth header".
    async fn token(&self, ctx: &Context) -> Result<String, CredentialsError>;
}

/// No authentication; the driver sends only the database header.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousCredentials;

#[async_trait]
impl Credentials for AnonymousCredentials {
    async fn token(&self, _ctx: &Context) -> Result<String, CredentialsError> {
        Ok(String::new())
    }
}

/// A static, pre-issued access token.
#[derive(Clone)]
pub struct AccessTokenCredentials {
    token: String,
}

impl AccessTokenCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        AccessTokenCredentials {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Credentials for AccessTokenCredentials {
    async fn token(&self, _ctx: &Context) -> Result<String, CredentialsError> {
        Ok(self.token.clone())
    }
}

impl std::fmt::Debug for AccessTokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token itself.
        f.debug_struct("AccessTokenCredentials").finish_non_exhaustive()
    }
}
