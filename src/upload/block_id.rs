//! Block identifier codec.
//!
//! A block id is the standard base64 encoding of the chunk index written
//! as six zero-padded ASCII digits.  Every id is therefore exactly eight
//! characters long, which the block-blob service requires of all ids in a
//! blob, and ids compare in the same order as their indices.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use thiserror::Error;

/// Digits in the decoded form of an id.
pub const INDEX_WIDTH: usize = 6;

/// Length of every encoded id.
pub const BLOCK_ID_LEN: usize = 8;

/// First index that no longer fits in [`INDEX_WIDTH`] digits.
pub const MAX_BLOCKS: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockIdError {
    #[error("block index {0} does not fit in {INDEX_WIDTH} digits")]
    IndexOutOfRange(u32),

    #[error("block id {0:?} is not valid base64")]
    NotBase64(String),

    #[error("block id {0:?} does not decode to {INDEX_WIDTH} ASCII digits")]
    Malformed(String),
}

/// Encode a chunk index as a block id.
pub fn encode(index: u32) -> Result<String, BlockIdError> {
    if index >= MAX_BLOCKS {
        return Err(BlockIdError::IndexOutOfRange(index));
    }
    Ok(BASE64_STANDARD.encode(format!("{:0width$}", index, width = INDEX_WIDTH)))
}

/// Recover the chunk index from a block id.
pub fn decode(id: &str) -> Result<u32, BlockIdError> {
    let raw = BASE64_STANDARD
        .decode(id)
        .map_err(|_| BlockIdError::NotBase64(id.to_string()))?;
    if raw.len() != INDEX_WIDTH || !raw.iter().all(u8::is_ascii_digit) {
        return Err(BlockIdError::Malformed(id.to_string()));
    }
    raw.iter()
        .try_fold(0u32, |acc, d| acc.checked_mul(10)?.checked_add(u32::from(d - b'0')))
        .ok_or_else(|| BlockIdError::Malformed(id.to_string()))
}

/// Ordered commit list `[encode(0), …, encode(total - 1)]`.
pub fn block_list(total: u32) -> Result<Vec<String>, BlockIdError> {
    if total > MAX_BLOCKS {
        return Err(BlockIdError::IndexOutOfRange(total - 1));
    }
    (0..total).map(encode).collect()
}
