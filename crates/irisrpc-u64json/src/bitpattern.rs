//! Conversions between numbers or byte buffers and the `u64` word arrays
//! used for register and memory payloads.
//!
//! Multi-word values are little-endian: the least significant 64 bits come
//! first.

use crate::error::{CodecError, Result};

/// Widest integer the chunk helpers can represent.
pub const MAX_INT_WIDTH: u32 = 128;

/// Split the low `width` bits of `value` into 64-bit chunks.
///
/// Widths above 64 produce two chunks; a width of 0 is treated as 64.
/// Bits above `width` are cleared.
pub fn to_u64_chunks(value: i128, width: u32) -> Result<Vec<u64>> {
    let width = checked_width(width)?;
    let bits = (value as u128) & mask(width);
    let count = width.div_ceil(64) as usize;
    Ok((0..count).map(|i| (bits >> (64 * i)) as u64).collect())
}

/// Assemble a `width`-bit integer from 64-bit chunks, sign-extending when
/// `signed` is set and the top bit of the field is 1.
///
/// Missing chunks read as zero; chunks beyond `width` are ignored.
pub fn from_u64_chunks(chunks: &[u64], width: u32, signed: bool) -> Result<i128> {
    let width = checked_width(width)?;
    let bits = chunks
        .iter()
        .take(2)
        .enumerate()
        .fold(0u128, |acc, (i, chunk)| acc | (u128::from(*chunk) << (64 * i)))
        & mask(width);
    if signed && width < 128 && bits >> (width - 1) & 1 == 1 {
        return Ok((bits | !mask(width)) as i128);
    }
    if !signed && width == 128 && bits >> 127 == 1 {
        return Err(CodecError::IntegerOutOfRange(bits as i128));
    }
    Ok(bits as i128)
}

pub fn f64_to_bits(value: f64) -> u64 {
    value.to_bits()
}

pub fn f64_from_bits(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// Single-precision values travel in the low 32 bits of a word.
pub fn f32_to_bits(value: f32) -> u64 {
    u64::from(value.to_bits())
}

pub fn f32_from_bits(bits: u64) -> f32 {
    f32::from_bits(bits as u32)
}

/// Pack bytes into little-endian words, zero padding the last one.
pub fn bytes_to_u64_array(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect()
}

/// Unpack little-endian words into `len` bytes.
///
/// Fails when `words` holds fewer than `len` bytes.
pub fn u64_array_to_bytes(words: &[u64], len: usize) -> Result<Vec<u8>> {
    let available = words.len() * 8;
    if len > available {
        return Err(CodecError::Truncated {
            offset: 0,
            needed: len.div_ceil(8),
            available: words.len(),
        });
    }
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    bytes.truncate(len);
    Ok(bytes)
}

fn checked_width(width: u32) -> Result<u32> {
    match width {
        0 => Ok(64),
        1..=MAX_INT_WIDTH => Ok(width),
        _ => Err(CodecError::LengthOverflow {
            len: width as usize,
            bits: MAX_INT_WIDTH,
        }),
    }
}

fn mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}
