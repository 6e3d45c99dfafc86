//! Streaming Filecoin piece commitment (commP / CommD) calculator.
//!
//! An arbitrary byte stream is fed through FR32 bit expansion and a binary
//! SHA-256-254 merkle tree built on the fly, one worker per live tree layer.
//! The result is the raw 32-byte commitment plus the padded piece size of
//! the tree it roots. Wrapping the digest in a CID is left to the caller.
//!
//! # Core concepts
//!
//! - **FR32 expansion**: every 127 input bytes are repacked into 128 bytes
//!   by splicing two zero bits after each 254-bit group, producing four
//!   32-byte tree leaves that are canonical BLS12-381 field elements.
//! - **SHA-256-254**: plain SHA-256 with the top two bits of the digest
//!   cleared, applied to every leaf pair all the way to the root.
//! - **Padded piece size**: the power-of-two width of the zero-padded tree,
//!   always between 128 bytes and 64 GiB.
//!
//! # Example
//!
//! ```rust
//! use commp::Calc;
//!
//! let calc = Calc::new();
//! calc.write(&[0xffu8; 254]).unwrap();
//! let (commp, padded_size) = calc.digest().unwrap();
//! assert_eq!(commp.len(), 32);
//! assert_eq!(padded_size, 256);
//! ```

pub mod calc;
pub mod fr32;
mod hash;
mod layer;
pub mod pad;

/// 32-byte raw commitment digest.
pub type Hash = [u8; 32];

/// Unpadded bytes consumed per FR32 expansion round.
pub const BLOCK_SIZE: usize = 127;

/// Bytes produced per FR32 expansion round: four 32-byte tree leaves.
pub const EXPANDED_BLOCK_SIZE: usize = 128;

/// Digest length in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Maximum height of the proving tree, supporting a 64 GiB padded piece.
pub const MAX_LAYERS: usize = 31;

/// Largest supported padded piece size in bytes.
pub const MAX_PIECE_SIZE: u64 = 1 << (MAX_LAYERS + 5);

/// Largest unpadded payload one accumulator accepts before a digest.
pub const MAX_PIECE_PAYLOAD: u64 =
    MAX_PIECE_SIZE / EXPANDED_BLOCK_SIZE as u64 * BLOCK_SIZE as u64;

/// Smallest payload for which the commitment is defined: anything shorter
/// does not straddle two field elements after expansion.
pub const MIN_PIECE_PAYLOAD: u64 = 65;

pub use calc::{Calc, CalcConfig, CalcError};
pub use fr32::expand_block;
pub use pad::{pad_commp, PadError};
