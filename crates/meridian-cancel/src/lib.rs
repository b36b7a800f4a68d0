//! Cancellation tokens and deadline-carrying call contexts.
//!
//! A [`CancellationTokenSource`] owns a one-way cancel signal observed
//! through clonable [`CancellationToken`]s. A [`Context`] layers an optional
//! deadline on top of any number of inherited tokens and is threaded through
//! every driver entry point: each blocking step awaits real work against
//! [`Context::done`] and aborts with a [`DoneReason`] when the caller gives
//! up first.

use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Why a context finished before its work did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoneReason {
    /// A `CancellationTokenSource` along the chain was cancelled.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl std::fmt::Display for DoneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DoneReason::Cancelled => f.write_str("context cancelled"),
            DoneReason::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for DoneReason {}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Observer half of a cancellation signal. Cheap to clone.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the owning source cancels. Never resolves for a token
    /// whose source is never cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut notified = pin!(self.inner.notify.notified());
        loop {
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.inner.notify.notified());
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owner half of a cancellation signal.
///
/// ```
/// use meridian_cancel::CancellationTokenSource;
///
/// let source = CancellationTokenSource::new();
/// let token = source.token();
/// assert!(!token.is_cancelled());
/// source.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel every token handed out by this source. Idempotent.
    pub fn cancel(&self) {
        self.token.inner.cancelled.store(true, Ordering::Release);
        self.token.inner.notify.notify_waiters();
    }
}

/// A token that is never cancelled, for call sites that require one.
pub fn never_cancels() -> CancellationToken {
    CancellationToken::default()
}

/// An immutable deadline + cancellation view passed down a call chain.
///
/// Child contexts only tighten: a child deadline never loosens the
/// parent's, and a parent's cancellation reaches every descendant.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    tokens: Vec<CancellationToken>,
}

impl Context {
    /// A context with no deadline that is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context whose deadline is `min(parent deadline, now + timeout)`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context whose deadline is `min(parent deadline, deadline)`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        });
        child
    }

    /// Child context with an additional cancellation source.
    pub fn with_cancel(&self) -> (Self, CancellationTokenSource) {
        let source = CancellationTokenSource::new();
        (self.with_token(source.token()), source)
    }

    /// Child context also observing `token`.
    pub fn with_token(&self, token: CancellationToken) -> Self {
        let mut child = self.clone();
        child.tokens.push(token);
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline as of `now`; `None` when undeadlined.
    /// A passed deadline reports `Some(ZERO)`.
    pub fn timeout_remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// `None` while live, otherwise why the context is done. Cancellation
    /// wins over an expired deadline when both hold.
    pub fn err(&self) -> Option<DoneReason> {
        if self.tokens.iter().any(CancellationToken::is_cancelled) {
            return Some(DoneReason::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(DoneReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    /// Pends forever on a background context.
    pub async fn done(&self) -> DoneReason {
        if let Some(reason) = self.err() {
            return reason;
        }
        let deadline = pin!(async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d.into()).await,
                None => std::future::pending().await,
            }
        });
        let cancelled = pin!(any_cancelled(&self.tokens));
        tokio::select! {
            _ = cancelled => DoneReason::Cancelled,
            _ = deadline => DoneReason::DeadlineExceeded,
        }
    }

    /// Race `fut` against this context. On expiry the future is dropped,
    /// which aborts whatever in-flight work it owned.
    pub async fn run_until_done<F: Future>(&self, fut: F) -> Result<F::Output, DoneReason> {
        let fut = pin!(fut);
        tokio::select! {
            biased;
            out = fut => Ok(out),
            reason = self.done() => Err(reason),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

async fn any_cancelled(tokens: &[CancellationToken]) {
    match tokens {
        [] => std::future::pending().await,
        [only] => only.cancelled().await,
        many => {
            let waits: Vec<Pin<Box<dyn Future<Output = ()> + Send + '_>>> =
                many.iter().map(|t| Box::pin(t.cancelled()) as _).collect();
            futures_util::future::select_all(waits).await;
        }
    }
}
