//! OZFX3 stream cipher and key derivation.
//!
//! Encrypted containers obfuscate every header field, the palettes, the scale
//! table and a prefix of each tile with a single-byte key. The key is not
//! stored in the file; it is derived from a seed byte and a small key block.
//!
//! The cipher XORs byte `j` with `KEY_TABLE[j % 26] + key` (wrapping), so
//! applying it twice with the same key restores the input.

use crate::error::{MapError, Result};

/// Offset of the "bytes per info block" value.
pub const BYTES_PER_INFO_OFFSET: u64 = 14;

/// Offset of the seed byte used to decrypt the key block.
pub const SEED_OFFSET: u64 = 0xA2;

/// Base offset of the key block, before adjusting for the info block size.
const KEY_BLOCK_BASE: u64 = 165;

/// Length of the info block the base offset assumes.
const INFO_BLOCK_LENGTH: u64 = 150;

/// Size of the key block in bytes.
pub const KEY_BLOCK_SIZE: usize = 4;

/// Number of table entries the cipher cycles through.
const KEY_CYCLE: usize = 0x1A;

const KEY_TABLE: [u8; 28] = [
    0x2D, 0x4A, 0x43, 0xF1, 0x27, 0x9B, 0x69, 0x4F, 0x36, 0x52, 0x87, 0xEC, 0x5F, 0x42, 0x53,
    0x22, 0x9E, 0x8B, 0x2D, 0x83, 0x3D, 0xD2, 0x84, 0xBA, 0xD8, 0x5B, 0x8B, 0xC0,
];

/// Discriminant that identifies a known but undecodable key scheme.
const UNSUPPORTED_DISCRIMINANT: u8 = 0x76;

/// Apply the stream cipher to `buf` in place, starting at table index 0.
///
/// The operation is its own inverse.
pub fn apply(buf: &mut [u8], key: u8) {
    for (j, byte) in buf.iter_mut().enumerate() {
        *byte ^= KEY_TABLE[j % KEY_CYCLE].wrapping_add(key);
    }
}

/// Apply the stream cipher to the first `len` bytes of `buf` only.
pub fn apply_prefix(buf: &mut [u8], len: usize, key: u8) {
    let len = len.min(buf.len());
    apply(&mut buf[..len], key);
}

/// Offset of the key block for a given "bytes per info block" value.
pub fn key_block_offset(bytes_per_info: u8) -> u64 {
    KEY_BLOCK_BASE + bytes_per_info as u64 - INFO_BLOCK_LENGTH
}

/// Offset of the encrypted container header (directly after the key block).
pub fn header_offset(bytes_per_info: u8) -> u64 {
    key_block_offset(bytes_per_info) + KEY_BLOCK_SIZE as u64
}

/// Seed adjustment selected by the first decrypted key block byte.
fn seed_adjustment(discriminant: u8) -> Option<u8> {
    match discriminant {
        0xF1 => Some(0x8A),
        0x18 | 0x54 => Some(0xA0),
        0x56 => Some(0xB9),
        0x43 => Some(0x6A),
        0x83 => Some(0xA4),
        0xC5 => Some(0x7E),
        0x38 => Some(0xC1),
        _ => None,
    }
}

/// Derive the file key from the raw seed byte and the still-encrypted key block.
///
/// # Errors
///
/// Returns [`MapError::Cipher`] if the decrypted discriminant is unknown or
/// belongs to the unsupported scheme.
pub fn derive_key(seed: u8, key_block: [u8; KEY_BLOCK_SIZE]) -> Result<u8> {
    let mut block = key_block;
    apply(&mut block, seed);
    let discriminant = block[0];

    tracing::debug!("OZFX3 key block discriminant {:#04x}", discriminant);

    if discriminant == UNSUPPORTED_DISCRIMINANT {
        return Err(MapError::Cipher { discriminant });
    }
    seed_adjustment(discriminant)
        .map(|adjust| seed.wrapping_add(adjust))
        .ok_or(MapError::Cipher { discriminant })
}
