//! Periodic background task runner.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use meridian_cancel::{CancellationTokenSource, Context};

/// Runs one task on a fixed interval on a dedicated worker until stopped.
///
/// Ticks never overlap: the next tick fires `interval` after the previous
/// one was due, and a tick that overruns is followed immediately by one
/// next tick, never by a catch-up burst. Each tick gets a fresh context
/// derived from the repeater's long-lived cancellation source, so `stop`
/// both prevents future ticks and cancels an in-flight one.
pub(crate) struct Repeater {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    cancel: CancellationTokenSource,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Repeater {
    pub(crate) fn spawn<F, Fut>(
        name: &'static str,
        interval: std::time::Duration,
        mut task: F,
    ) -> Self
    where
        F: FnMut(Context) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut stopped) = watch::channel(false);
        let cancel = CancellationTokenSource::new();
        let token = cancel.token();
        let worker = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        task(Context::background().with_token(token.clone())).await;
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!(name, "repeater stopped");
        });
        Repeater {
            name,
            shutdown,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Signal shutdown, cancel an in-flight tick and join the worker.
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        debug!(name = self.name, "repeater joined");
    }

    /// Non-blocking teardown for drop paths.
    pub(crate) fn shutdown_now(&self) {
        let _ = self.shutdown.send(true);
        self.cancel.cancel();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_the_configured_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let repeater = {
            let count = count.clone();
            Repeater::spawn("test", Duration::from_secs(10), move |_ctx| {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        repeater.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let repeater = {
            let count = count.clone();
            Repeater::spawn("test", Duration::from_secs(10), move |_ctx| {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_secs(15)).await;
        repeater.stop().await;
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_tick_delays_the_next_without_burst() {
        let count = Arc::new(AtomicUsize::new(0));
        let repeater = {
            let count = count.clone();
            Repeater::spawn("test", Duration::from_secs(10), move |_ctx| {
                let count = count.clone();
                async move {
                    let slow_first_tick = count.fetch_add(1, Ordering::SeqCst) == 0;
                    if slow_first_tick {
                        tokio::time::sleep(Duration::from_secs(25)).await;
                    }
                }
            })
        };

        // First tick at t=10 runs until t=35; with Delay semantics the
        // following ticks land near t=35 and t=45, not in a burst of three.
        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        repeater.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_an_inflight_tick() {
        let entered = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let repeater = {
            let entered = entered.clone();
            let finished = finished.clone();
            Repeater::spawn("test", Duration::from_secs(10), move |ctx| {
                let entered = entered.clone();
                let finished = finished.clone();
                async move {
                    entered.fetch_add(1, Ordering::SeqCst);
                    // A well-behaved task gives up when its context does.
                    let _ = ctx.run_until_done(std::future::pending::<()>()).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        repeater.stop().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
