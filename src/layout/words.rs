//! Conversions between typed values and the raw 32-bit words a packed buffer
//! is made of.
//!
//! A packed buffer is an array of words regardless of the logical type of
//! each field. Float fields store their IEEE-754 bits, integer fields store
//! their two's complement bits, so the kernel can declare a field as `u32` or
//! `vec2u` and read back exactly the integer that was written.

use std::borrow::Cow;

pub fn float_word(value: f32) -> u32 {
    value.to_bits()
}

pub fn uint_word(value: u32) -> u32 {
    value
}

pub fn int_word(value: i32) -> u32 {
    u32::from_ne_bytes(value.to_ne_bytes())
}

pub fn word_as_f32(word: u32) -> f32 {
    f32::from_bits(word)
}

pub fn word_as_i32(word: u32) -> i32 {
    i32::from_ne_bytes(word.to_ne_bytes())
}

/// Little-endian byte view of a word slice, borrowed where the host already
/// matches the GPU byte order.
pub fn words_to_bytes(words: &[u32]) -> Cow<'_, [u8]> {
    if cfg!(target_endian = "little") {
        Cow::Borrowed(bytemuck::cast_slice(words))
    } else {
        Cow::Owned(words.iter().flat_map(|word| word.to_le_bytes()).collect())
    }
}
