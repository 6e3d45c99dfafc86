//! Tree layer workers.
//!
//! Each live level of the commitment tree is serviced by one worker thread
//! pulling slabs of 32-byte chunks from a bounded queue. A worker pairs and
//! hashes the chunks it receives, forwards the halved slab to the level
//! above (spawning that level's worker just before the first upward send),
//! and holds a lone unpaired chunk until its sibling arrives. When its
//! queue closes, the worker pads any held chunk with the level's
//! nul-subtree root, closes the level above, and joins it, so the collapse
//! travels to the top of the tower and out through the result channel.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use tracing::trace;

use crate::hash::{hash_slab, nul_padding, sha254_pair};
use crate::{Hash, DIGEST_SIZE};

/// Sending half of a layer's input queue plus its join handle. Dropping
/// the sender is the end-of-stream signal.
pub(crate) struct LayerHandle {
    pub(crate) tx: SyncSender<Vec<u8>>,
    pub(crate) handle: JoinHandle<()>,
}

pub(crate) struct LayerWorker {
    level: usize,
    rx: Receiver<Vec<u8>>,
    result_tx: SyncSender<Hash>,
    queue_depth: usize,
    next: Option<LayerHandle>,
    hold: Option<Hash>,
}

impl LayerWorker {
    /// Spawn the worker servicing `level`.
    pub(crate) fn spawn(
        level: usize,
        queue_depth: usize,
        result_tx: SyncSender<Hash>,
    ) -> LayerHandle {
        let (tx, rx) = sync_channel(queue_depth);
        let worker = LayerWorker {
            level,
            rx,
            result_tx,
            queue_depth,
            next: None,
            hold: None,
        };
        trace!(level, "spawning tree layer worker");
        let handle = thread::Builder::new()
            .name(format!("commp-layer-{level}"))
            .spawn(move || worker.run())
            .expect("failed to spawn tree layer worker");
        LayerHandle { tx, handle }
    }

    fn run(mut self) {
        while let Ok(slab) = self.rx.recv() {
            self.absorb(slab);
        }
        self.collapse();
    }

    /// Pair and hash the chunks of one incoming slab, preceded by any held
    /// chunk; a chunk left without a sibling becomes the new hold.
    fn absorb(&mut self, slab: Vec<u8>) {
        debug_assert_eq!(slab.len() % DIGEST_SIZE, 0);
        debug_assert!((slab.len() / DIGEST_SIZE).is_power_of_two());

        let halved = match self.hold.take() {
            None if slab.len() == DIGEST_SIZE => {
                self.hold = Some(chunk(&slab));
                return;
            }
            None => hash_slab(&slab),
            Some(held) => {
                // The held chunk pairs with the slab's first chunk and the
                // rest pair among themselves, which leaves the slab's last
                // chunk without a sibling whenever the slab is larger than
                // one chunk.
                let mut halved =
                    Vec::with_capacity(slab.len().max(2 * DIGEST_SIZE) / 2);
                halved.extend_from_slice(&sha254_pair(&held, &slab[..DIGEST_SIZE]));
                if slab.len() > DIGEST_SIZE {
                    let tail = slab.len() - DIGEST_SIZE;
                    for pair in slab[DIGEST_SIZE..tail].chunks_exact(2 * DIGEST_SIZE) {
                        halved.extend_from_slice(&sha254_pair(
                            &pair[..DIGEST_SIZE],
                            &pair[DIGEST_SIZE..],
                        ));
                    }
                    self.hold = Some(chunk(&slab[tail..]));
                }
                halved
            }
        };
        self.forward(halved);
    }

    fn forward(&mut self, slab: Vec<u8>) {
        let next = match self.next.take() {
            Some(next) => next,
            None => LayerWorker::spawn(self.level + 1, self.queue_depth, self.result_tx.clone()),
        };
        next.tx
            .send(slab)
            .expect("upper tree layer worker terminated unexpectedly");
        self.next = Some(next);
    }

    /// The queue below closed: pad a held chunk against this level's
    /// nul-subtree root if the tower continues above, or report the root.
    fn collapse(mut self) {
        match self.next.take() {
            Some(next) => {
                if let Some(held) = self.hold.take() {
                    let padded = sha254_pair(&held, nul_padding(self.level));
                    next.tx
                        .send(padded.to_vec())
                        .expect("upper tree layer worker terminated unexpectedly");
                }
                drop(next.tx);
                next.handle.join().expect("tree layer worker panicked");
            }
            None => {
                // Topmost live layer: the held chunk is the commitment. A
                // tower torn down before any full slab was emitted has
                // nothing to report and the receiver discards the zero
                // chunk. The send fails only when the accumulator itself
                // is gone.
                let root = self.hold.take().unwrap_or_default();
                trace!(level = self.level, "tree collapsed");
                let _ = self.result_tx.send(root);
            }
        }
    }
}

fn chunk(bytes: &[u8]) -> Hash {
    bytes.try_into().expect("exactly one 32-byte chunk")
}
