use crate::config::RendererConfig;
use crate::renderer::{Renderer, SessionProfile};
use crate::GleanError;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Rotates through a fixed set of client identities
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<String>,
    next: AtomicUsize,
}

impl IdentityPool {
    pub fn new(identities: Vec<String>) -> Self {
        Self {
            identities,
            next: AtomicUsize::new(0),
        }
    }

    /// Next identity in round-robin order; empty when none are configured
    pub fn next(&self) -> &str {
        if self.identities.is_empty() {
            return "";
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.identities.len();
        &self.identities[i]
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// A session on loan from the pool
///
/// Dropping the lease returns its slot to the pool.
pub struct Lease<S> {
    session: S,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<S> Lease<S> {
    /// Returns the session to the pool
    pub fn release(self) {}
}

impl<S> Deref for Lease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> DerefMut for Lease<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// Bounded pool of renderer sessions
///
/// Sessions are leased per unit of work. After every `recycle_after` leases the
/// underlying engine is recycled to bound memory growth.
pub struct RendererPool<R: Renderer> {
    renderer: Arc<R>,
    permits: Option<Arc<Semaphore>>,
    max_sessions: usize,
    fail_fast: bool,
    identities: IdentityPool,
    recycle_after: u64,
    leases: AtomicU64,
    recycles: AtomicU64,
    recycle_lock: Mutex<()>,
    closed: AtomicBool,
}

impl<R: Renderer> RendererPool<R> {
    pub fn new(renderer: R, config: &RendererConfig) -> Self {
        Self {
            renderer: Arc::new(renderer),
            permits: config.max_sessions.map(|n| Arc::new(Semaphore::new(n))),
            max_sessions: config.max_sessions.unwrap_or(usize::MAX),
            fail_fast: config.fail_fast,
            identities: IdentityPool::new(config.user_agents.clone()),
            recycle_after: config.recycle_after.max(1),
            leases: AtomicU64::new(0),
            recycles: AtomicU64::new(0),
            recycle_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Total leases handed out
    pub fn lease_count(&self) -> u64 {
        self.leases.load(Ordering::Acquire)
    }

    pub fn recycle_count(&self) -> u64 {
        self.recycles.load(Ordering::Acquire)
    }

    /// Sessions currently available under the cap, if one is configured
    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }

    /// Leases a session
    ///
    /// With a session cap this waits for a free slot, or fails with
    /// [`GleanError::PoolExhausted`] when the pool is configured to fail fast.
    pub async fn acquire(&self, profile: SessionProfile) -> Result<Lease<R::Session>, GleanError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GleanError::PoolClosed);
        }

        let permit = match &self.permits {
            None => None,
            Some(permits) if self.fail_fast => match permits.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(TryAcquireError::NoPermits) => {
                    return Err(GleanError::PoolExhausted {
                        max_sessions: self.max_sessions,
                    })
                }
                Err(TryAcquireError::Closed) => return Err(GleanError::PoolClosed),
            },
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| GleanError::PoolClosed)?,
            ),
        };

        let lease_number = self.leases.fetch_add(1, Ordering::AcqRel) + 1;
        if lease_number % self.recycle_after == 0 {
            self.recycle().await;
        }

        let session = self.renderer.open(profile, self.identities.next()).await?;
        Ok(Lease {
            session,
            _permit: permit,
        })
    }

    async fn recycle(&self) {
        // Concurrent recycle triggers collapse into one
        let Ok(_guard) = self.recycle_lock.try_lock() else {
            return;
        };

        match self.renderer.recycle().await {
            Ok(()) => {
                let n = self.recycles.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(recycles = n, "Renderer recycled");
            }
            Err(e) => warn!("Renderer recycle failed: {}", e),
        }
    }

    /// Stops handing out sessions and shuts the engine down
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(permits) = &self.permits {
            permits.close();
        }
        self.renderer.shutdown().await;
        info!(
            leases = self.lease_count(),
            recycles = self.recycle_count(),
            "Renderer pool shut down"
        );
    }
}
