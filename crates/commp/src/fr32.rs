//! FR32 bit expansion.
//!
//! A 127-byte block of piece payload holds 1016 bits, exactly four 254-bit
//! groups. Expansion splices two zero "shim" bits after every group, so the
//! output is 128 bytes: four 256-bit values whose top two bits are clear,
//! which makes them canonical BLS12-381 scalars and the four leaves of a
//! depth-2 subtree.

use crate::{BLOCK_SIZE, EXPANDED_BLOCK_SIZE};

/// Expand one 127-byte block into its 128-byte FR32 form.
pub fn expand_block(input: &[u8; BLOCK_SIZE], out: &mut [u8; EXPANDED_BLOCK_SIZE]) {
    // The first 254-bit group passes through verbatim; the shim lands in
    // the top bits of byte 31.
    out[..32].copy_from_slice(&input[..32]);
    out[31] &= 0x3F;

    // Each later group is shifted by the accumulated shim offset: two,
    // four, then six bits.
    for i in 31..63 {
        out[i + 1] = input[i + 1] << 2 | input[i] >> 6;
    }
    out[63] &= 0x3F;

    for i in 63..95 {
        out[i + 1] = input[i + 1] << 4 | input[i] >> 4;
    }
    out[95] &= 0x3F;

    for i in 95..126 {
        out[i + 1] = input[i + 1] << 6 | input[i] >> 2;
    }
    // The six straggler bits of the last input byte.
    out[127] = input[126] >> 2;
}

/// Expand a slab of whole 127-byte blocks into `blocks × 128` bytes of
/// 32-byte tree leaves. The block count is a power of two so the output
/// always forms a balanced subtree.
pub(crate) fn expand_slab(input: &[u8]) -> Vec<u8> {
    debug_assert_eq!(input.len() % BLOCK_SIZE, 0);
    debug_assert!((input.len() / BLOCK_SIZE).is_power_of_two());

    let mut out = vec![0u8; input.len() / BLOCK_SIZE * EXPANDED_BLOCK_SIZE];
    for (block, expanded) in input
        .chunks_exact(BLOCK_SIZE)
        .zip(out.chunks_exact_mut(EXPANDED_BLOCK_SIZE))
    {
        let block: &[u8; BLOCK_SIZE] = block.try_into().expect("whole input block");
        let expanded: &mut [u8; EXPANDED_BLOCK_SIZE] =
            expanded.try_into().expect("whole output block");
        expand_block(block, expanded);
    }
    out
}
