//! Lease auto-renewal
//!
//! One `LeaseRenewer` per held, auto-renewable lock. The renewer's
//! background task periodically renews the lease well before the server
//! would expire it, and exits on the first of: its own stop signal (the
//! lock was released) or the session-wide close signal.

use std::sync::Arc;
use std::time::Duration;

use latch_api::grpc::latch::RenewRequest;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error};

use crate::retry::{RETRY_DELAY, with_retry};
use crate::transport::LockTransport;

/// Renew this many seconds before the lease would expire, leaving room
/// for network latency and one full retry cycle.
const RENEW_AHEAD_SECS: i32 = 30;

/// Minimum interval between renewal calls.
const MIN_RENEW_INTERVAL_SECS: u64 = 10;

/// Interval between renewal calls for a lease of the given duration.
pub(crate) fn renew_interval(lease_timeout_seconds: i32) -> Duration {
    if lease_timeout_seconds <= RENEW_AHEAD_SECS {
        Duration::from_secs(MIN_RENEW_INTERVAL_SECS)
    } else {
        let ahead = (lease_timeout_seconds - RENEW_AHEAD_SECS) as u64;
        Duration::from_secs(ahead.max(MIN_RENEW_INTERVAL_SECS))
    }
}

pub(crate) struct LeaseRenewer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LeaseRenewer {
    /// Spawn the renewal loop for a held lock.
    pub(crate) fn spawn(
        transport: Arc<dyn LockTransport>,
        name: String,
        key: String,
        lease_timeout_seconds: i32,
        max_retries: u32,
        session_closed: watch::Receiver<bool>,
    ) -> Self {
        let interval = renew_interval(lease_timeout_seconds);
        Self::spawn_with_timing(
            transport,
            name,
            key,
            lease_timeout_seconds,
            max_retries,
            session_closed,
            interval,
            RETRY_DELAY,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_with_timing(
        transport: Arc<dyn LockTransport>,
        name: String,
        key: String,
        lease_timeout_seconds: i32,
        max_retries: u32,
        session_closed: watch::Receiver<bool>,
        interval: Duration,
        retry_delay: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(renew_loop(
            transport,
            name,
            key,
            lease_timeout_seconds,
            max_retries,
            retry_delay,
            interval,
            stop_rx,
            session_closed,
        ));
        Self {
            stop: stop_tx,
            task,
        }
    }

    /// Signal the renewal loop to exit. Safe to call repeatedly or
    /// concurrently with the loop's own termination; never blocks. An
    /// in-flight renewal call may still complete, but no new one is
    /// issued once the signal is observed.
    pub(crate) fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the background task to finish.
    pub(crate) async fn join(self) {
        let _ = self.task.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn renew_loop(
    transport: Arc<dyn LockTransport>,
    name: String,
    key: String,
    lease_timeout_seconds: i32,
    max_retries: u32,
    retry_delay: Duration,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    mut closed_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() || *closed_rx.borrow() {
            debug!(name = %name, "lease renewer stopped");
            return;
        }
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                debug!(name = %name, "lease renewer stopped");
                return;
            }
            _ = closed_rx.changed() => {
                debug!(name = %name, "lease renewer observed session close");
                return;
            }
            _ = time::sleep(interval) => {
                let response = with_retry(max_retries, retry_delay, || {
                    let req = RenewRequest {
                        name: name.clone(),
                        key: key.clone(),
                        lease_timeout_seconds,
                    };
                    let transport = Arc::clone(&transport);
                    async move { transport.renew(req).await }
                })
                .await;

                // A renewal that fails after the retry budget leaves the
                // lease state unknowable: the client may no longer hold a
                // lock it believes it holds. A panic inside a spawned task
                // would be captured by its JoinHandle rather than crash
                // the process, so escalate by aborting.
                match response {
                    Ok(resp) => match resp.error {
                        None => debug!(name = %name, "lease renewed"),
                        Some(err) => {
                            error!(name = %name, code = err.code, message = %err.message,
                                "lease renewal rejected; aborting");
                            std::process::abort();
                        }
                    },
                    Err(status) => {
                        error!(name = %name, status = %status, "lease renewal failed; aborting");
                        std::process::abort();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use latch_api::grpc::latch::{
        AcquireRequest, LockResponse, ReleaseRequest, ReleaseResponse, TryAcquireRequest,
    };
    use tonic::Status;

    use super::*;

    #[derive(Default)]
    struct CountingTransport {
        renew_calls: AtomicU32,
    }

    #[async_trait]
    impl LockTransport for CountingTransport {
        async fn acquire(
            &self,
            _req: AcquireRequest,
        ) -> std::result::Result<LockResponse, Status> {
            unimplemented!("not used by the renewal loop")
        }

        async fn try_acquire(
            &self,
            _req: TryAcquireRequest,
        ) -> std::result::Result<LockResponse, Status> {
            unimplemented!("not used by the renewal loop")
        }

        async fn release(
            &self,
            _req: ReleaseRequest,
        ) -> std::result::Result<ReleaseResponse, Status> {
            unimplemented!("not used by the renewal loop")
        }

        async fn renew(&self, req: RenewRequest) -> std::result::Result<LockResponse, Status> {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            Ok(LockResponse {
                locked: true,
                name: req.name,
                key: req.key,
                error: None,
            })
        }
    }

    fn spawn_fast(
        transport: Arc<CountingTransport>,
        closed_rx: watch::Receiver<bool>,
    ) -> LeaseRenewer {
        LeaseRenewer::spawn_with_timing(
            transport,
            "job".to_string(),
            "key-1".to_string(),
            60,
            0,
            closed_rx,
            Duration::from_millis(10),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_renew_interval_floor() {
        // At or below the renew-ahead threshold, the floor applies
        assert_eq!(renew_interval(1), Duration::from_secs(10));
        assert_eq!(renew_interval(30), Duration::from_secs(10));
        // Just above the threshold the floor still applies
        assert_eq!(renew_interval(35), Duration::from_secs(10));
        assert_eq!(renew_interval(40), Duration::from_secs(10));
        // Beyond it, renew 30 seconds ahead of expiry
        assert_eq!(renew_interval(41), Duration::from_secs(11));
        assert_eq!(renew_interval(100), Duration::from_secs(70));
        assert_eq!(renew_interval(600), Duration::from_secs(570));
    }

    #[tokio::test]
    async fn test_renews_periodically_until_stopped() {
        let transport = Arc::new(CountingTransport::default());
        let (_closed_tx, closed_rx) = watch::channel(false);
        let renewer = spawn_fast(Arc::clone(&transport), closed_rx);

        time::sleep(Duration::from_millis(100)).await;
        let seen = transport.renew_calls.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several renewals, saw {seen}");

        renewer.stop();
        renewer.join().await;

        let after_stop = transport.renew_calls.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.renew_calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let transport = Arc::new(CountingTransport::default());
        let (_closed_tx, closed_rx) = watch::channel(false);
        let renewer = spawn_fast(transport, closed_rx);

        renewer.stop();
        renewer.stop();
        renewer.stop();
        renewer.join().await;
    }

    #[tokio::test]
    async fn test_session_close_stops_renewer() {
        let transport = Arc::new(CountingTransport::default());
        let (closed_tx, closed_rx) = watch::channel(false);
        let renewer = spawn_fast(Arc::clone(&transport), closed_rx);

        closed_tx.send(true).unwrap();
        renewer.join().await;

        let after_close = transport.renew_calls.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.renew_calls.load(Ordering::SeqCst), after_close);
    }

    #[tokio::test]
    async fn test_already_closed_session_spawns_no_renewals() {
        let transport = Arc::new(CountingTransport::default());
        let (closed_tx, closed_rx) = watch::channel(false);
        closed_tx.send(true).unwrap();

        let renewer = spawn_fast(Arc::clone(&transport), closed_rx);
        renewer.join().await;

        assert_eq!(transport.renew_calls.load(Ordering::SeqCst), 0);
    }
}
