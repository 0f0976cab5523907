//! Shared, capacity-limited browser pool.
//!
//! The headless driver itself is an external collaborator behind
//! [`BrowserBackend`] / [`Page`]; this module owns everything the engine
//! needs from it: warm capacity, per-page leasing bounded by a semaphore,
//! and the guarantee that every lease is either returned or destroyed.
//!
//! Pages are single-request, single-use: a lease always hands out a fresh
//! page and never recycles one across requests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::CrawlError;

/// One isolated browser page. Implementations wrap a real driver page
/// (CDP target, WebDriver session) and map its failures onto
/// [`CrawlError`].
#[async_trait]
pub trait Page: Send {
    /// Navigate and wait for the load signal, bounded by `timeout`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), CrawlError>;

    /// Wait until `selector` is present, bounded by `timeout`.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration)
        -> Result<(), CrawlError>;

    /// Current serialized DOM.
    async fn content(&mut self) -> Result<String, CrawlError>;

    /// Tear the page down. `clean` distinguishes an orderly return from a
    /// crash teardown, letting the backend decide whether the parent
    /// context is still trustworthy.
    async fn close(&mut self, clean: bool);
}

/// Factory for pages, owning the underlying browser process/contexts.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>, CrawlError>;

    /// Close every live context.
    async fn shutdown(&self);

    /// Liveness for the health endpoint.
    fn is_ready(&self) -> bool;
}

/// A leased page plus the capacity permit keeping the pool bounded.
///
/// Consume with [`PageLease::release`]; dropping without release still
/// frees the capacity permit but leaks the driver page, which is logged.
pub struct PageLease {
    page: Option<Box<dyn Page>>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PageLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageLease")
            .field("page", &self.page.is_some())
            .finish()
    }
}

impl PageLease {
    pub fn page(&mut self) -> &mut dyn Page {
        self.page
            .as_mut()
            .expect("page accessed after release")
            .as_mut()
    }

    /// Return the lease. `ok=false` marks the page as crashed so the
    /// backend must not reuse its context.
    pub async fn release(mut self, ok: bool) {
        if let Some(mut page) = self.page.take() {
            page.close(ok).await;
        }
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if self.page.is_some() {
            tracing::warn!("page lease dropped without release; driver page leaked");
        }
    }
}

/// Capacity-bounded pool over a [`BrowserBackend`].
///
/// Invariants: never more than `capacity` pages live at once; a lease
/// always resolves within its deadline or fails with `Timeout`; shutdown
/// waits for in-flight leases to drain (up to its own deadline).
pub struct BrowserPool {
    backend: Option<Arc<dyn BrowserBackend>>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl BrowserPool {
    pub fn new(backend: Arc<dyn BrowserBackend>, capacity: usize) -> Self {
        Self {
            backend: Some(backend),
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// A pool with no driver attached: every lease fails and health
    /// reports `disabled`. Used when `features.slowpath_enabled` is off.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            semaphore: Arc::new(Semaphore::new(1)),
            capacity: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_ready())
    }

    /// Acquire a capacity permit and a fresh page, all within `deadline`.
    pub async fn lease(&self, deadline: Duration) -> Result<PageLease, CrawlError> {
        let Some(backend) = self.backend.clone() else {
            return Err(CrawlError::BrowserCrash("browser pool disabled".into()));
        };

        let started = std::time::Instant::now();
        let permit = tokio::time::timeout(deadline, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| CrawlError::Timeout)?
            .map_err(|_| CrawlError::BrowserCrash("browser pool closed".into()))?;

        let remaining = deadline.saturating_sub(started.elapsed());
        let page = tokio::time::timeout(remaining, backend.new_page())
            .await
            .map_err(|_| CrawlError::Timeout)??;

        Ok(PageLease {
            page: Some(page),
            _permit: permit,
        })
    }

    /// Wait for every lease to drain, then close the backend.
    pub async fn shutdown(&self, deadline: Duration) {
        let drained = tokio::time::timeout(
            deadline,
            self.semaphore.acquire_many(self.capacity.max(1) as u32),
        )
        .await;
        if drained.is_err() {
            tracing::warn!("browser pool shutdown deadline hit with leases outstanding");
        }
        if let Some(backend) = &self.backend {
            backend.shutdown().await;
        }
    }
}
