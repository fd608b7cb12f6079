//! In-process [`StateStore`] implementations.
//!
//! - [`InMemoryStateStore`]: a volatile store for tests and local experiments.
//!   It counts writes and can be switched into a failing mode.
//! - [`CachedStateStore`]: a write-through cache in front of a durable store,
//!   so a warm process does not re-read an unchanged watermark every cycle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ports::{StateStore, StoreError};
use crate::Watermark;

/// Volatile watermark store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    record: Mutex<Option<Watermark>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    offline: AtomicBool,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `watermark`.
    pub fn with_watermark(watermark: Watermark) -> Self {
        Self {
            record: Mutex::new(Some(watermark)),
            ..Self::default()
        }
    }

    /// Returns the current record without counting it as a read.
    pub fn snapshot(&self) -> Option<Watermark> {
        self.lock().clone()
    }

    /// Number of successful reads so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every subsequent read and write fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("state store offline".into()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Watermark>> {
        // A poisoned lock only means a panicking test thread; the data is still a
        // whole watermark because writes are single assignments.
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn read(&self) -> Result<Option<Watermark>, StoreError> {
        self.check_online()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().clone())
    }

    async fn write(&self, watermark: &Watermark) -> Result<(), StoreError> {
        self.check_online()?;
        *self.lock() = Some(watermark.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// Write-through cache over another [`StateStore`].
///
/// The cache holds exactly what the inner store last confirmed: it is filled by
/// a successful read, replaced after a successful write, and dropped when a
/// write fails (the inner store's state is then unknown).
///
/// The cache assumes this process is the only writer. Another process updating
/// the same record is not observed until the cache is dropped, which is the
/// same cross-process limitation the poll cycle already has.
pub struct CachedStateStore<S> {
    inner: S,
    cached: Mutex<Option<Watermark>>,
}

impl<S: StateStore> CachedStateStore<S> {
    /// Wraps `inner` with an empty cache.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Forgets the cached watermark; the next read goes to the inner store.
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Watermark>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<S: StateStore> StateStore for CachedStateStore<S> {
    async fn read(&self) -> Result<Option<Watermark>, StoreError> {
        let cached = self.lock().clone();
        if let Some(hit) = cached {
            tracing::trace!(last_seen_id = %hit.last_seen_id, "watermark served from cache");
            return Ok(Some(hit));
        }
        let loaded = self.inner.read().await?;
        if let Some(watermark) = &loaded {
            *self.lock() = Some(watermark.clone());
        }
        Ok(loaded)
    }

    async fn write(&self, watermark: &Watermark) -> Result<(), StoreError> {
        match self.inner.write(watermark).await {
            Ok(()) => {
                *self.lock() = Some(watermark.clone());
                Ok(())
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }
}
