//! Reference-counted views into an assembled buffer window.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;

/// Byte-accounting guard against the ring's semaphore gauge.
///
/// Permits are acquired (and `forget`-ted) up front; dropping the guard
/// returns them, which is what unblocks the reader task.
pub(crate) struct GaugeGuard {
    len: usize,
    gauge: Arc<Semaphore>,
}

impl GaugeGuard {
    /// Wait until `len` bytes of buffer budget are free and claim them.
    pub(crate) async fn acquire(gauge: &Arc<Semaphore>, len: usize) -> GaugeGuard {
        if len > 0 {
            gauge
                .acquire_many(len as u32)
                .await
                .expect("ring gauge is never closed")
                .forget();
        }
        GaugeGuard {
            len,
            gauge: gauge.clone(),
        }
    }

    /// Take over `len` bytes that were already acquired elsewhere.
    pub(crate) fn adopt(gauge: &Arc<Semaphore>, len: usize) -> GaugeGuard {
        GaugeGuard {
            len,
            gauge: gauge.clone(),
        }
    }

    /// Give back the budget for bytes that were claimed but not read.
    pub(crate) fn shrink_to(&mut self, len: usize) {
        debug_assert!(len <= self.len);
        self.gauge.add_permits(self.len - len);
        self.len = len;
    }

    /// Hand this guard's accounting to another guard.
    pub(crate) fn disarm(&mut self) -> usize {
        std::mem::take(&mut self.len)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        if self.len > 0 {
            self.gauge.add_permits(self.len);
        }
    }
}

/// Shared ownership of one assembled window's gauge accounting.
pub(crate) struct WindowBacking {
    _guard: GaugeGuard,
}

impl WindowBacking {
    pub(crate) fn new(guard: GaugeGuard) -> Arc<Self> {
        Arc::new(WindowBacking { _guard: guard })
    }
}

/// A reference-counted borrow of a contiguous span of the ring buffer.
///
/// Cloning (via [`Region::reserve`]) pins the backing window; the window's
/// buffer budget frees only when the last clone drops.
pub struct Region {
    bytes: Bytes,
    backing: Arc<WindowBacking>,
}

impl Region {
    pub(crate) fn new(bytes: Bytes, backing: Arc<WindowBacking>) -> Region {
        Region { bytes, backing }
    }

    /// The region's bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the region holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A region over `offset .. offset + len` of this region.
    pub fn sub_region(&self, offset: usize, len: usize) -> Region {
        Region {
            bytes: self.bytes.slice(offset..offset + len),
            backing: self.backing.clone(),
        }
    }

    /// Take an additional reservation on the backing window.
    ///
    /// The reservation is released when the returned region drops.
    pub fn reserve(&self) -> Region {
        Region {
            bytes: self.bytes.clone(),
            backing: self.backing.clone(),
        }
    }

    /// Zero-copy view of the region's bytes with independent lifetime
    /// tracking (the backing stays pinned through `self`).
    pub fn as_shared(&self) -> Bytes {
        self.bytes.clone()
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("len", &self.bytes.len())
            .finish()
    }
}
