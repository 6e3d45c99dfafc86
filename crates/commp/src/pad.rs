//! Extend a finished piece commitment to a larger padded piece size.

use crate::hash::{nul_padding, sha254_pair};
use crate::{Hash, DIGEST_SIZE, MAX_PIECE_SIZE};

/// Smallest padded piece size a commitment can describe: four 32-byte
/// leaves, one FR32-expanded block.
const MIN_PADDED_PIECE_SIZE: u64 = 128;

/// Argument validation errors from [`pad_commp`].
#[derive(Debug, thiserror::Error)]
pub enum PadError {
    #[error("commitment must be exactly 32 bytes, got {0}")]
    InvalidCommitmentLength(usize),
    #[error("source padded size {0} is not a power of two")]
    SourceSizeNotPow2(u64),
    #[error("target padded size {0} is not a power of two")]
    TargetSizeNotPow2(u64),
    #[error("source padded size {src} exceeds target padded size {target}")]
    SourceLargerThanTarget { src: u64, target: u64 },
    #[error("source padded size {0} is below the minimum of 128 bytes")]
    SourceTooSmall(u64),
    #[error("target padded size {target} exceeds the maximum piece size of {max} bytes")]
    TargetTooLarge { target: u64, max: u64 },
}

/// Grow a commitment from `src_padded_size` to `tgt_padded_size` by
/// hashing it against nul-subtree roots, one tree level per doubling.
/// Both sizes are padded piece sizes, i.e. powers of two. Returns a copy
/// of the input when the sizes are equal.
pub fn pad_commp(
    commp: &[u8],
    src_padded_size: u64,
    tgt_padded_size: u64,
) -> Result<Hash, PadError> {
    if commp.len() != DIGEST_SIZE {
        return Err(PadError::InvalidCommitmentLength(commp.len()));
    }
    if !src_padded_size.is_power_of_two() {
        return Err(PadError::SourceSizeNotPow2(src_padded_size));
    }
    if !tgt_padded_size.is_power_of_two() {
        return Err(PadError::TargetSizeNotPow2(tgt_padded_size));
    }
    if src_padded_size > tgt_padded_size {
        return Err(PadError::SourceLargerThanTarget {
            src: src_padded_size,
            target: tgt_padded_size,
        });
    }
    if src_padded_size < MIN_PADDED_PIECE_SIZE {
        return Err(PadError::SourceTooSmall(src_padded_size));
    }
    if tgt_padded_size > MAX_PIECE_SIZE {
        return Err(PadError::TargetTooLarge {
            target: tgt_padded_size,
            max: MAX_PIECE_SIZE,
        });
    }

    let mut out: Hash = commp.try_into().expect("length checked above");

    // A padded size of 2^k spans levels [5, k): the offset of 5 accounts
    // for the 32-byte leaf width.
    let src_level = src_padded_size.trailing_zeros() as usize;
    let tgt_level = tgt_padded_size.trailing_zeros() as usize;
    for level in src_level..tgt_level {
        out = sha254_pair(&out, nul_padding(level - 5));
    }

    Ok(out)
}
