//! SHA-256-254 primitives shared by the layer workers, the nul-padding
//! table, and the pad extender.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::{Hash, DIGEST_SIZE, MAX_LAYERS};

/// Slabs at least this large are pair-hashed on the rayon pool.
const PARALLEL_SLAB_BYTES: usize = 1024;

/// Hash `left ‖ right` and clear the top two bits of the result, keeping
/// it a canonical BLS12-381 scalar.
pub(crate) fn sha254_pair(left: &[u8], right: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut digest: Hash = hasher.finalize().into();
    digest[31] &= 0x3F;
    digest
}

/// Roots of all-zero subtrees, one per tree level: entry 0 is a zero leaf,
/// entry `k` the root of `2^k` zero leaves.
static NUL_PADDING: Lazy<[Hash; MAX_LAYERS]> = Lazy::new(|| {
    let mut table = [[0u8; DIGEST_SIZE]; MAX_LAYERS];
    for level in 1..MAX_LAYERS {
        table[level] = sha254_pair(&table[level - 1], &table[level - 1]);
    }
    table
});

/// Nul-subtree root for `level`.
pub(crate) fn nul_padding(level: usize) -> &'static Hash {
    &NUL_PADDING[level]
}

/// Hash every adjacent chunk pair of `slab` into a slab half its size.
/// The input holds a power-of-two number of 32-byte chunks, at least two.
pub(crate) fn hash_slab(slab: &[u8]) -> Vec<u8> {
    debug_assert!(slab.len() >= 2 * DIGEST_SIZE);
    debug_assert!((slab.len() / DIGEST_SIZE).is_power_of_two());

    let mut out = vec![0u8; slab.len() / 2];
    if slab.len() >= PARALLEL_SLAB_BYTES {
        out.par_chunks_mut(DIGEST_SIZE)
            .zip(slab.par_chunks(2 * DIGEST_SIZE))
            .for_each(|(parent, pair)| {
                parent
                    .copy_from_slice(&sha254_pair(&pair[..DIGEST_SIZE], &pair[DIGEST_SIZE..]));
            });
    } else {
        for (parent, pair) in out
            .chunks_exact_mut(DIGEST_SIZE)
            .zip(slab.chunks_exact(2 * DIGEST_SIZE))
        {
            parent.copy_from_slice(&sha254_pair(&pair[..DIGEST_SIZE], &pair[DIGEST_SIZE..]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha254_clears_top_bits() {
        let digest = sha254_pair(&[0xff; 32], &[0xff; 32]);
        assert_eq!(digest[31] & 0xC0, 0);
    }

    #[test]
    fn test_sha254_differs_from_plain_sha256() {
        // Some pair whose plain SHA-256 has a high bit set in byte 31.
        let mut hasher = Sha256::new();
        hasher.update([1u8; 32]);
        hasher.update([2u8; 32]);
        let plain: [u8; 32] = hasher.finalize().into();
        let masked = sha254_pair(&[1u8; 32], &[2u8; 32]);
        assert_eq!(masked[..31], plain[..31]);
        assert_eq!(masked[31], plain[31] & 0x3F);
    }

    #[test]
    fn test_nul_padding_known_levels() {
        assert_eq!(nul_padding(0), &[0u8; 32]);
        assert_eq!(
            hex::encode(nul_padding(1)),
            "f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a92759fb0b"
        );
        assert_eq!(
            hex::encode(nul_padding(2)),
            "3731bb99ac689f66eef5973e4a94da188f4ddcae580724fc6f3fd60dfd488333"
        );
        assert_eq!(
            hex::encode(nul_padding(3)),
            "642a607ef886b004bf2c1978463ae1d4693ac0f410eb2d1b7a47fe205e5e750f"
        );
        assert_eq!(
            hex::encode(nul_padding(4)),
            "57a2381a28652bf47f6bef7aca679be4aede5871ab5cf3eb2c08114488cb8526"
        );
        assert_eq!(
            hex::encode(nul_padding(30)),
            "077e5fde35c50a9303a55009e3498a4ebedff39c42b710b730d8ec7ac7afa63e"
        );
    }

    #[test]
    fn test_nul_padding_recurrence() {
        for level in 1..MAX_LAYERS {
            let below = nul_padding(level - 1);
            assert_eq!(nul_padding(level), &sha254_pair(below, below));
        }
    }

    #[test]
    fn test_hash_slab_matches_pairwise() {
        let mut slab = vec![0u8; 4 * DIGEST_SIZE];
        for (i, byte) in slab.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let halved = hash_slab(&slab);
        assert_eq!(halved.len(), 2 * DIGEST_SIZE);
        assert_eq!(halved[..32], sha254_pair(&slab[..32], &slab[32..64]));
        assert_eq!(halved[32..], sha254_pair(&slab[64..96], &slab[96..128]));
    }

    #[test]
    fn test_hash_slab_parallel_path_matches_sequential() {
        // 64 chunks crosses the parallel threshold.
        let mut slab = vec![0u8; 64 * DIGEST_SIZE];
        for (i, byte) in slab.iter_mut().enumerate() {
            *byte = (i % 241) as u8;
        }
        let halved = hash_slab(&slab);
        for (parent, pair) in halved.chunks_exact(DIGEST_SIZE).zip(slab.chunks_exact(64)) {
            assert_eq!(parent, &sha254_pair(&pair[..32], &pair[32..])[..]);
        }
    }
}
