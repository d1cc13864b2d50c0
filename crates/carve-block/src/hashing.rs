//! The asynchronous hashing bus.
//!
//! With `async_hashers > 0` the block maker posts payloads here instead
//! of hashing inline. Worker threads share one channel, each digesting
//! jobs and filling the destination header's CID cell. Workers drain and
//! exit when the bus handle (and with it the sender) drops.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use carve_types::{Cid, HasherKind};
use tokio::sync::mpsc;
use tracing::trace;

use crate::header::CidCell;

/// Everything a worker needs to turn a digest into a CID.
#[derive(Clone, Copy)]
pub(crate) struct CidRecipe {
    pub hasher: HasherKind,
    pub hash_len: usize,
    pub codec: u64,
    pub cid_v0: bool,
}

impl CidRecipe {
    pub(crate) fn build<'a>(&self, segments: impl IntoIterator<Item = &'a [u8]>) -> Cid {
        let digest = self.hasher.digest(segments, self.hash_len);
        if self.cid_v0 {
            Cid::v0(&digest)
        } else {
            Cid::v1(self.codec, self.hasher.multihash_code(), &digest)
        }
    }
}

pub(crate) struct HashJob {
    pub segments: Vec<Bytes>,
    pub recipe: CidRecipe,
    pub cell: Arc<CidCell>,
}

/// Handle over the worker pool; dropping it closes the channel and lets
/// the workers drain and exit.
pub struct HashingBus {
    tx: mpsc::UnboundedSender<HashJob>,
}

impl HashingBus {
    /// Spawn `workers` hashing threads.
    pub(crate) fn new(workers: usize) -> Result<HashingBus, String> {
        let (tx, rx) = mpsc::unbounded_channel::<HashJob>();
        let rx = Arc::new(Mutex::new(rx));

        for n in 0..workers {
            let rx = rx.clone();
            std::thread::Builder::new()
                .name(format!("carve-hash-{n}"))
                .spawn(move || {
                    loop {
                        // Receive under the shared lock, hash outside it.
                        let job = {
                            let mut rx = rx.lock().expect("hash bus receiver lock poisoned");
                            rx.blocking_recv()
                        };
                        match job {
                            Some(job) => {
                                let cid = job
                                    .recipe
                                    .build(job.segments.iter().map(|segment| segment.as_ref()));
                                job.cell.set(cid);
                            }
                            None => {
                                trace!("hashing bus closed, worker exiting");
                                return;
                            }
                        }
                    }
                })
                .map_err(|e| format!("failed to spawn hashing worker: {e}"))?;
        }

        Ok(HashingBus { tx })
    }

    pub(crate) fn submit(&self, job: HashJob) {
        // Receivers only disappear at teardown; a lost job's cell would
        // only be awaited by code that is also being torn down.
        let _ = self.tx.send(job);
    }
}
