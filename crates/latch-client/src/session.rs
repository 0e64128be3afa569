//! Session façade: acquire/release orchestration and lease bookkeeping
//!
//! The session owns the transport and a table of lease renewers, one
//! per held auto-renewable lock. Acquiring a lock with a lease timeout
//! registers a renewer; releasing the lock (or closing the session)
//! stops it before the release call goes out, so no renewal races with
//! an in-flight release.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use latch_api::grpc::latch::{
    AcquireRequest, LockResponse, ReleaseRequest, RenewRequest, TryAcquireRequest,
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::renewal::LeaseRenewer;
use crate::retry::{RETRY_DELAY, with_retry};
use crate::transport::{GrpcTransport, LockTransport};

/// Options for [`Session::acquire`] and [`Session::try_acquire`].
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// How long the server may block waiting for a contended lock.
    /// Not allowed with `try_acquire`.
    pub wait_timeout_seconds: Option<i32>,
    /// Lease lifetime after grant. `None` means the lock never expires
    /// and is not auto-renewed.
    pub lease_timeout_seconds: Option<i32>,
    /// Semaphore size for sized locks.
    pub size: Option<i32>,
}

impl AcquireOptions {
    pub fn with_wait_timeout(mut self, seconds: i32) -> Self {
        self.wait_timeout_seconds = Some(seconds);
        self
    }

    pub fn with_lease_timeout(mut self, seconds: i32) -> Self {
        self.lease_timeout_seconds = Some(seconds);
        self
    }

    pub fn with_size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }
}

/// Handle to a lock acquisition.
pub struct Lock {
    inner: Arc<SessionInner>,
    /// Lock name.
    pub name: String,
    /// Opaque proof of ownership, required to release or renew.
    pub key: String,
    /// Whether this handle currently holds the lock. Transitions
    /// true to false exactly once, on successful release.
    pub locked: bool,
}

impl Lock {
    /// Release the lock.
    ///
    /// Releasing a handle that is no longer held fails immediately with
    /// [`ClientError::NotLocked`], without a network call.
    pub async fn release(&mut self) -> Result<bool> {
        if !self.locked {
            return Err(ClientError::NotLocked);
        }
        let released = self.inner.release(&self.name, &self.key).await?;
        if released {
            self.locked = false;
        }
        Ok(released)
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("locked", &self.locked)
            .finish()
    }
}

/// Client session with the lock service.
///
/// Cheap to clone; all clones share the transport, the renewal table,
/// and the close signal.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    transport: Arc<dyn LockTransport>,
    /// One renewer per held auto-renewable lock, keyed by lock name.
    renewers: DashMap<String, LeaseRenewer>,
    /// Session-wide close signal, observed by every renewer.
    closed: watch::Sender<bool>,
    no_auto_renew: bool,
    max_retries: u32,
}

impl Session {
    /// Connect to the lock service described by `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(GrpcTransport::connect(&config).await?);
        Ok(Self::with_transport(
            transport,
            config.no_auto_renew,
            config.max_retries,
        ))
    }

    fn with_transport(
        transport: Arc<dyn LockTransport>,
        no_auto_renew: bool,
        max_retries: u32,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                transport,
                renewers: DashMap::new(),
                closed,
                no_auto_renew,
                max_retries,
            }),
        }
    }

    /// Acquire a lock, waiting for it to become available (up to the
    /// optional wait timeout). On a granted lease, auto-renewal starts
    /// unless disabled in the session config.
    pub async fn acquire(&self, name: &str, options: &AcquireOptions) -> Result<Lock> {
        let req = AcquireRequest {
            name: name.to_string(),
            wait_timeout_seconds: options.wait_timeout_seconds,
            lease_timeout_seconds: options.lease_timeout_seconds,
            size: options.size,
        };
        let inner = &self.inner;
        let resp = with_retry(inner.max_retries, RETRY_DELAY, || {
            let req = req.clone();
            let transport = Arc::clone(&inner.transport);
            async move { transport.acquire(req).await }
        })
        .await?;

        inner.finish_acquire(resp, options.lease_timeout_seconds.unwrap_or(0))
    }

    /// Acquire a lock, failing immediately if it is held.
    pub async fn try_acquire(&self, name: &str, options: &AcquireOptions) -> Result<Lock> {
        if options.wait_timeout_seconds.is_some() {
            return Err(ClientError::WaitTimeoutNotAllowed);
        }
        let req = TryAcquireRequest {
            name: name.to_string(),
            lease_timeout_seconds: options.lease_timeout_seconds,
            size: options.size,
        };
        let inner = &self.inner;
        let resp = with_retry(inner.max_retries, RETRY_DELAY, || {
            let req = req.clone();
            let transport = Arc::clone(&inner.transport);
            async move { transport.try_acquire(req).await }
        })
        .await?;

        inner.finish_acquire(resp, options.lease_timeout_seconds.unwrap_or(0))
    }

    /// Release a lock by name and ownership key.
    pub async fn release(&self, name: &str, key: &str) -> Result<bool> {
        self.inner.release(name, key).await
    }

    /// Renew a held lock's lease. Called automatically for
    /// auto-renewable locks; public for sessions that manage leases
    /// themselves.
    pub async fn renew(&self, name: &str, key: &str, lease_timeout_seconds: i32) -> Result<Lock> {
        let req = RenewRequest {
            name: name.to_string(),
            key: key.to_string(),
            lease_timeout_seconds,
        };
        let inner = &self.inner;
        let resp = with_retry(inner.max_retries, RETRY_DELAY, || {
            let req = req.clone();
            let transport = Arc::clone(&inner.transport);
            async move { transport.renew(req).await }
        })
        .await?;

        inner.lock_from_response(resp)
    }

    /// Close the session: broadcast the close signal, then stop and
    /// wait out every outstanding lease renewer. The underlying channel
    /// closes once the last handle drops.
    pub async fn close(&self) {
        let _ = self.inner.closed.send(true);

        let names: Vec<String> = self.inner.renewers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, renewer)) = self.inner.renewers.remove(&name) {
                renewer.stop();
                renewer.join().await;
            }
        }
        info!("session closed");
    }
}

impl SessionInner {
    fn finish_acquire(self: &Arc<Self>, resp: LockResponse, lease_timeout_seconds: i32) -> Result<Lock> {
        if resp.locked {
            self.maybe_spawn_renewer(&resp, lease_timeout_seconds);
        }
        self.lock_from_response(resp)
    }

    fn lock_from_response(self: &Arc<Self>, resp: LockResponse) -> Result<Lock> {
        if let Some(err) = resp.error {
            return Err(ClientError::from_rpc_error(err));
        }
        Ok(Lock {
            inner: Arc::clone(self),
            name: resp.name,
            key: resp.key,
            locked: resp.locked,
        })
    }

    /// Register a renewer when the grant is auto-renewable: locked,
    /// renewal enabled, nonzero lease.
    ///
    /// # Panics
    ///
    /// Panics if a renewer already exists for the lock name. The
    /// session's bookkeeping and the server's lock state have diverged,
    /// and the client cannot reason about which lease the renewer is
    /// keeping alive.
    fn maybe_spawn_renewer(self: &Arc<Self>, resp: &LockResponse, lease_timeout_seconds: i32) {
        if self.no_auto_renew || lease_timeout_seconds == 0 {
            return;
        }

        match self.renewers.entry(resp.name.clone()) {
            Entry::Occupied(_) => {
                panic!(
                    "session out of sync - lock {:?} already has a lease renewer",
                    resp.name
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(LeaseRenewer::spawn(
                    Arc::clone(&self.transport),
                    resp.name.clone(),
                    resp.key.clone(),
                    lease_timeout_seconds,
                    self.max_retries,
                    self.closed.subscribe(),
                ));
                debug!(name = %resp.name, lease_timeout_seconds, "lease renewer registered");
            }
        }
    }

    /// Stop the lock's renewer (if any), then issue the release call.
    async fn release(&self, name: &str, key: &str) -> Result<bool> {
        self.stop_renewer(name);

        let req = ReleaseRequest {
            name: name.to_string(),
            key: key.to_string(),
        };
        let resp = with_retry(self.max_retries, RETRY_DELAY, || {
            let req = req.clone();
            let transport = Arc::clone(&self.transport);
            async move { transport.release(req).await }
        })
        .await?;

        if let Some(err) = resp.error {
            return Err(ClientError::from_rpc_error(err));
        }
        debug!(name = %name, released = resp.released, "lock released");
        Ok(resp.released)
    }

    fn stop_renewer(&self, name: &str) {
        if self.no_auto_renew {
            return;
        }
        if let Some((_, renewer)) = self.renewers.remove(name) {
            renewer.stop();
        }
    }
}
