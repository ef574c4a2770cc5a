//! Pure helpers over big-endian 32-byte ABI words. No RPC, no state; every
//! out-of-bounds read yields `None` so callers can drop malformed logs.

use alloy::primitives::{Address, U256};

/// Size of one ABI slot.
pub const WORD: usize = 32;

/// Interpret the first 32 bytes of `word` as a big-endian unsigned integer.
pub fn word_to_uint256(word: &[u8]) -> Option<U256> {
    let word = word.get(..WORD)?;
    Some(U256::from_be_slice(word))
}

/// The low 20 bytes of a 32-byte word as an address.
pub fn word_to_address(word: &[u8]) -> Option<Address> {
    let word = word.get(..WORD)?;
    Some(Address::from_slice(&word[12..]))
}

/// Decode a dynamic `uint256[]`: the word at `offset` is the length L,
/// followed by L 32-byte words.
pub fn decode_uint256_array(data: &[u8], offset: usize) -> Option<Vec<U256>> {
    let length_end = offset.checked_add(WORD)?;
    let length = word_to_uint256(data.get(offset..length_end)?)?;
    let length = usize::try_from(length).ok()?;

    let mut values = Vec::with_capacity(length);
    for i in 0..length {
        let start = length_end.checked_add(i.checked_mul(WORD)?)?;
        let end = start.checked_add(WORD)?;
        values.push(word_to_uint256(data.get(start..end)?)?);
    }
    Some(values)
}
