//! Streaming commP accumulator.

use std::io;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Mutex;

use tracing::debug;

use crate::fr32::expand_slab;
use crate::layer::{LayerHandle, LayerWorker};
use crate::{
    Hash, BLOCK_SIZE, DIGEST_SIZE, EXPANDED_BLOCK_SIZE, MAX_PIECE_PAYLOAD, MIN_PIECE_PAYLOAD,
};

/// Default depth of each layer's input queue, in slab messages.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Default number of 127-byte blocks gathered into one slab.
pub const DEFAULT_BLOCKS_PER_SLAB: usize = 8;

/// Errors returned by [`Calc::write`] and [`Calc::digest`].
#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    #[error(
        "writing {attempted} bytes on top of {consumed} would overflow the maximum \
         unpadded piece payload of {max} bytes"
    )]
    PayloadTooLarge {
        attempted: u64,
        consumed: u64,
        max: u64,
    },
    #[error(
        "commP is not defined for payloads shorter than {min} bytes, \
         only {consumed} written so far"
    )]
    InsufficientData { consumed: u64, min: u64 },
}

/// Tunables for a [`Calc`] instance. Neither changes the digest, only
/// scheduling granularity and memory footprint.
#[derive(Debug, Clone)]
pub struct CalcConfig {
    /// Bounded depth of each layer queue, in slab messages.
    pub queue_depth: usize,
    /// 127-byte blocks buffered and expanded as one slab. Must be a power
    /// of two; larger slabs raise the arity of layer-0 subtrees.
    pub blocks_per_slab: usize,
}

impl Default for CalcConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            blocks_per_slab: DEFAULT_BLOCKS_PER_SLAB,
        }
    }
}

impl CalcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        assert!(depth > 0, "queue depth must be non-zero");
        self.queue_depth = depth;
        self
    }

    pub fn with_blocks_per_slab(mut self, blocks: usize) -> Self {
        assert!(
            blocks.is_power_of_two(),
            "blocks_per_slab must be a power of two"
        );
        self.blocks_per_slab = blocks;
        self
    }
}

/// The live worker tower of one streaming computation.
struct Pipeline {
    layer0: LayerHandle,
    result_rx: Receiver<Hash>,
}

impl Pipeline {
    fn feed(&self, slab: Vec<u8>) {
        self.layer0
            .tx
            .send(slab)
            .expect("tree layer worker terminated unexpectedly");
    }

    /// Close the layer-0 queue and wait for the tower to collapse into the
    /// root. Joining layer 0 transitively joins every worker above it.
    fn collapse(self) -> Hash {
        let Pipeline { layer0, result_rx } = self;
        drop(layer0.tx);
        let root = result_rx
            .recv()
            .expect("commP pipeline terminated without a result");
        layer0.handle.join().expect("tree layer worker panicked");
        root
    }
}

#[derive(Default)]
struct State {
    bytes_consumed: u64,
    carry: Vec<u8>,
    pipeline: Option<Pipeline>,
}

/// Streaming piece commitment accumulator.
///
/// A fresh instance is ready for [`write`](Calc::write); layer workers and
/// queues come into existence on the first non-empty write and are torn
/// down again by [`digest`](Calc::digest) or [`reset`](Calc::reset).
/// Public methods serialise on an internal mutex, so a shared reference is
/// usable from several threads and observes a total order.
///
/// Abandoning a written-to instance without digesting takes a
/// [`reset`](Calc::reset) to terminate the workers synchronously; merely
/// dropping the instance closes the queues and lets them wind down on
/// their own.
pub struct Calc {
    config: CalcConfig,
    state: Mutex<State>,
}

impl Default for Calc {
    fn default() -> Self {
        Self::new()
    }
}

impl Calc {
    pub fn new() -> Self {
        Self::with_config(CalcConfig::default())
    }

    pub fn with_config(config: CalcConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Bytes consumed per expansion round. Writing multiples of this
    /// avoids internal carry copies.
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Length of the digest returned by [`digest`](Calc::digest).
    pub fn digest_size(&self) -> usize {
        DIGEST_SIZE
    }

    /// Add bytes to the accumulator. Never performs a short write: on
    /// success the returned count equals `input.len()`.
    ///
    /// Blocks when the layer-0 queue is full, which is the backpressure of
    /// hashing lagging behind input.
    pub fn write(&self, input: &[u8]) -> Result<usize, CalcError> {
        if input.is_empty() {
            return Ok(0);
        }
        let written = input.len();
        let mut state = self.state.lock().unwrap();

        if state.bytes_consumed + written as u64 > MAX_PIECE_PAYLOAD {
            return Err(CalcError::PayloadTooLarge {
                attempted: written as u64,
                consumed: state.bytes_consumed,
                max: MAX_PIECE_PAYLOAD,
            });
        }

        let slab_bytes = self.config.blocks_per_slab * BLOCK_SIZE;
        if state.pipeline.is_none() {
            state.pipeline = Some(self.spawn_pipeline());
            state.carry = Vec::with_capacity(slab_bytes);
        }
        state.bytes_consumed += written as u64;

        let mut input = input;
        if !state.carry.is_empty() {
            let wanted = slab_bytes - state.carry.len();
            if input.len() < wanted {
                state.carry.extend_from_slice(input);
                return Ok(written);
            }
            state.carry.extend_from_slice(&input[..wanted]);
            input = &input[wanted..];
            let slab = expand_slab(&state.carry);
            state.pipeline.as_ref().expect("pipeline is live").feed(slab);
            state.carry.clear();
        }

        while input.len() >= slab_bytes {
            let slab = expand_slab(&input[..slab_bytes]);
            state.pipeline.as_ref().expect("pipeline is live").feed(slab);
            input = &input[slab_bytes..];
        }
        state.carry.extend_from_slice(input);

        Ok(written)
    }

    /// Collapse the tree and return the raw 32-byte commitment and the
    /// padded piece size. On success the accumulator resets and all worker
    /// threads terminate; on error the accumulated state is untouched and
    /// the caller may keep writing.
    pub fn digest(&self) -> Result<(Hash, u64), CalcError> {
        let mut state = self.state.lock().unwrap();

        if state.bytes_consumed < MIN_PIECE_PAYLOAD {
            return Err(CalcError::InsufficientData {
                consumed: state.bytes_consumed,
                min: MIN_PIECE_PAYLOAD,
            });
        }
        let pipeline = state
            .pipeline
            .take()
            .expect("pipeline exists once the payload floor is met");

        // Flush the carry zero-padded to whole blocks, in descending
        // power-of-two batches so every slab stays a balanced subtree.
        if !state.carry.is_empty() {
            if state.carry.len() % BLOCK_SIZE != 0 {
                let padded = (state.carry.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
                state.carry.resize(padded, 0);
            }
            let mut rest = state.carry.as_slice();
            while !rest.is_empty() {
                let blocks = prev_power_of_two(rest.len() / BLOCK_SIZE);
                let (slab, tail) = rest.split_at(blocks * BLOCK_SIZE);
                pipeline.feed(expand_slab(slab));
                rest = tail;
            }
        }

        let padded_piece_size = padded_piece_size(state.bytes_consumed);
        let commp = pipeline.collapse();

        debug!(
            bytes = state.bytes_consumed,
            padded_piece_size, "piece commitment collapsed"
        );
        *state = State::default();
        Ok((commp, padded_piece_size))
    }

    /// Append the digest to `buf`. Destructive like
    /// [`digest`](Calc::digest), and panics if the accumulated payload is
    /// too short for a commitment.
    pub fn sum(&self, mut buf: Vec<u8>) -> Vec<u8> {
        let (commp, _) = self.digest().expect("commP digest failed");
        buf.extend_from_slice(&commp);
        buf
    }

    /// Clear all state and terminate the worker tower. Safe to call in any
    /// state; a no-op unless data was written since construction, the last
    /// reset, or the last successful digest.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(pipeline) = state.pipeline.take() {
            debug!(bytes = state.bytes_consumed, "resetting live accumulator");
            let _ = pipeline.collapse();
        }
        *state = State::default();
    }

    fn spawn_pipeline(&self) -> Pipeline {
        let (result_tx, result_rx) = sync_channel(1);
        let layer0 = LayerWorker::spawn(0, self.config.queue_depth, result_tx);
        Pipeline { layer0, result_rx }
    }
}

impl io::Write for Calc {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Calc::write(self, buf).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Padded tree width for `bytes` of unpadded payload: the 127-multiple
/// block count expanded by 128/127 and rounded up to a power of two.
fn padded_piece_size(bytes: u64) -> u64 {
    let padded =
        (bytes + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64 * EXPANDED_BLOCK_SIZE as u64;
    if padded.is_power_of_two() {
        padded
    } else {
        padded.next_power_of_two()
    }
}

fn prev_power_of_two(n: usize) -> usize {
    debug_assert!(n > 0);
    1 << (usize::BITS - 1 - n.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_PIECE_SIZE;

    #[test]
    fn test_empty_write_is_a_noop() {
        let calc = Calc::new();
        assert_eq!(calc.write(&[]).unwrap(), 0);
        // No pipeline was spawned, so reset has nothing to tear down.
        assert!(calc.state.lock().unwrap().pipeline.is_none());
        calc.reset();
    }

    #[test]
    fn test_write_reports_full_length() {
        let calc = Calc::new();
        assert_eq!(calc.write(&[0u8; 1000]).unwrap(), 1000);
        calc.reset();
    }

    #[test]
    fn test_digest_underflow_keeps_state() {
        let calc = Calc::new();
        calc.write(&[1u8; 64]).unwrap();
        assert!(matches!(
            calc.digest(),
            Err(CalcError::InsufficientData { consumed: 64, .. })
        ));
        // One more byte crosses the floor and the digest succeeds.
        calc.write(&[1u8]).unwrap();
        let (_, padded) = calc.digest().unwrap();
        assert_eq!(padded, 128);
    }

    #[test]
    fn test_payload_cap_rejected_without_state_change() {
        let calc = Calc::new();
        calc.write(&[7u8; 100]).unwrap();
        {
            let mut state = calc.state.lock().unwrap();
            state.bytes_consumed = MAX_PIECE_PAYLOAD - 10;
        }
        assert!(matches!(
            calc.write(&[0u8; 11]),
            Err(CalcError::PayloadTooLarge { attempted: 11, .. })
        ));
        // The failed write consumed nothing.
        assert_eq!(
            calc.state.lock().unwrap().bytes_consumed,
            MAX_PIECE_PAYLOAD - 10
        );
        assert_eq!(calc.write(&[0u8; 10]).unwrap(), 10);
        calc.reset();
    }

    #[test]
    fn test_reset_on_fresh_instance_is_safe() {
        let calc = Calc::new();
        calc.reset();
        calc.reset();
    }

    #[test]
    fn test_reset_after_carry_only_write() {
        // Fewer bytes than one slab: nothing ever reached layer 0.
        let calc = Calc::new();
        calc.write(&[3u8; 100]).unwrap();
        calc.reset();
        assert!(calc.state.lock().unwrap().pipeline.is_none());
    }

    #[test]
    fn test_padded_piece_size_rounding() {
        assert_eq!(padded_piece_size(65), 128);
        assert_eq!(padded_piece_size(127), 128);
        assert_eq!(padded_piece_size(128), 256);
        assert_eq!(padded_piece_size(254), 256);
        assert_eq!(padded_piece_size(255), 512);
        assert_eq!(padded_piece_size(1016), 1024);
        assert_eq!(padded_piece_size(1017), 2048);
        assert_eq!(padded_piece_size(MAX_PIECE_PAYLOAD), MAX_PIECE_SIZE);
    }

    #[test]
    fn test_prev_power_of_two() {
        assert_eq!(prev_power_of_two(1), 1);
        assert_eq!(prev_power_of_two(2), 2);
        assert_eq!(prev_power_of_two(3), 2);
        assert_eq!(prev_power_of_two(7), 4);
        assert_eq!(prev_power_of_two(8), 8);
    }

    #[test]
    fn test_calc_is_send_and_sync() {
        fn assert_bounds<T: Send + Sync>() {}
        assert_bounds::<Calc>();
    }
}
