//! The block header and its CID cell.

use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;
use carve_types::Cid;

/// One chunker decision paired with a zero-copy view of its bytes.
///
/// The view borrows (via refcount) from the originating buffer region;
/// the accompanying region reservation travels separately through the
/// post-processing queue.
#[derive(Clone)]
pub struct DataSource {
    /// Chunk length as decided by the chunker.
    pub chunk_size: usize,
    /// The chunk's bytes.
    pub content: Bytes,
}

/// Write-once CID slot, fillable from a hash worker thread.
pub(crate) struct CidCell {
    state: Mutex<Option<Cid>>,
    cond: Condvar,
}

impl CidCell {
    pub(crate) fn filled(cid: Cid) -> Arc<CidCell> {
        Arc::new(CidCell {
            state: Mutex::new(Some(cid)),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn pending() -> Arc<CidCell> {
        Arc::new(CidCell {
            state: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn set(&self, cid: Cid) {
        let mut slot = self.state.lock().expect("cid cell lock poisoned");
        debug_assert!(slot.is_none(), "cid cell filled twice");
        *slot = Some(cid);
        self.cond.notify_all();
    }

    fn wait(&self) -> Cid {
        let mut slot = self.state.lock().expect("cid cell lock poisoned");
        loop {
            if let Some(cid) = slot.as_ref() {
                return cid.clone();
            }
            slot = self.cond.wait(slot).expect("cid cell lock poisoned");
        }
    }

    fn try_get(&self) -> Option<Cid> {
        self.state
            .lock()
            .expect("cid cell lock poisoned")
            .as_ref()
            .cloned()
    }
}

/// An immutable block descriptor.
///
/// Immutable post-construction apart from [`Header::evict_content`],
/// which is idempotent and only called once every consumer has taken
/// what it needs.
pub struct Header {
    cid: Arc<CidCell>,
    content: Mutex<Vec<Bytes>>,
    size_block: usize,
    size_cumulative_payload: u64,
    size_cumulative_dag: u64,
    is_cid_inlined: bool,
    dummy_hashed: bool,
}

impl Header {
    pub(crate) fn new(
        cid: Arc<CidCell>,
        content: Vec<Bytes>,
        size_block: usize,
        size_cumulative_payload: u64,
        size_cumulative_dag: u64,
        is_cid_inlined: bool,
        dummy_hashed: bool,
    ) -> Arc<Header> {
        Arc::new(Header {
            cid: cid.clone(),
            content: Mutex::new(content),
            size_block,
            size_cumulative_payload,
            size_cumulative_dag,
            is_cid_inlined,
            dummy_hashed,
        })
    }

    /// The block's CID, waiting for an in-flight hash worker if needed.
    pub fn cid(&self) -> Cid {
        self.cid.wait()
    }

    /// The CID if it has already been materialised.
    pub fn try_cid(&self) -> Option<Cid> {
        self.cid.try_get()
    }

    /// Await the CID without blocking the async runtime.
    pub async fn cid_async(self: &Arc<Self>) -> Cid {
        if let Some(cid) = self.try_cid() {
            return cid;
        }
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.cid())
            .await
            .expect("cid wait task panicked")
    }

    /// On-wire size of this block alone.
    pub fn size_block(&self) -> usize {
        self.size_block
    }

    /// Total payload bytes reachable through this subtree.
    pub fn size_cumulative_payload(&self) -> u64 {
        self.size_cumulative_payload
    }

    /// Total on-wire bytes of this subtree (this block + descendants).
    pub fn size_cumulative_dag(&self) -> u64 {
        self.size_cumulative_dag
    }

    /// True iff the CID uses the identity multihash.
    pub fn is_cid_inlined(&self) -> bool {
        self.is_cid_inlined
    }

    /// True iff the block was produced with the `none` hasher.
    pub fn dummy_hashed(&self) -> bool {
        self.dummy_hashed
    }

    /// The on-wire content as a list of segments (cheap clones).
    ///
    /// Empty after eviction.
    pub fn content(&self) -> Vec<Bytes> {
        self.content.lock().expect("content lock poisoned").clone()
    }

    /// Drop the content segments. Idempotent.
    pub fn evict_content(&self) {
        let mut segments = self.content.lock().expect("content lock poisoned");
        segments.clear();
        segments.shrink_to_fit();
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("size_block", &self.size_block)
            .field("dag", &self.size_cumulative_dag)
            .field("payload", &self.size_cumulative_payload)
            .field("inlined", &self.is_cid_inlined)
            .finish()
    }
}
