//! Minimal ABI decoding over log topics and data.
//!
//! The registered descriptors only need word-level access: indexed
//! fields arrive as topics, non-indexed fields as 32-byte words in the
//! log data (with the usual offset/length layout for dynamic arrays).

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

/// Errors raised while decoding a log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A topic at the given position is missing.
    #[error("missing topic at index {0}")]
    MissingTopic(usize),

    /// The data section is shorter than the requested word.
    #[error("data too short for word {0}")]
    DataTooShort(usize),

    /// A dynamic array header is inconsistent with the data length.
    #[error("malformed dynamic array at word {0}")]
    MalformedArray(usize),
}

/// Read-only decoder over a log's topics and data.
#[derive(Debug, Clone, Copy)]
pub struct LogDecoder<'a> {
    topics: &'a [B256],
    data: &'a [u8],
}

impl<'a> LogDecoder<'a> {
    /// Creates a decoder over the given topics and data.
    #[must_use]
    pub const fn new(topics: &'a [B256], data: &'a [u8]) -> Self {
        Self { topics, data }
    }

    /// Returns the raw 32-byte word at the given topic index.
    pub fn topic(&self, index: usize) -> Result<B256, DecodeError> {
        self.topics
            .get(index)
            .copied()
            .ok_or(DecodeError::MissingTopic(index))
    }

    /// Decodes the topic at the given index as an address.
    pub fn topic_address(&self, index: usize) -> Result<Address, DecodeError> {
        Ok(Address::from_word(self.topic(index)?))
    }

    /// Decodes the topic at the given index as an unsigned integer.
    pub fn topic_u256(&self, index: usize) -> Result<U256, DecodeError> {
        Ok(U256::from_be_bytes(self.topic(index)?.0))
    }

    /// Returns the raw 32-byte data word at the given word index.
    pub fn word(&self, index: usize) -> Result<B256, DecodeError> {
        let start = index * 32;
        let end = start + 32;
        let slice = self
            .data
            .get(start..end)
            .ok_or(DecodeError::DataTooShort(index))?;
        let mut word = [0u8; 32];
        word.copy_from_slice(slice);
        Ok(B256::from(word))
    }

    /// Decodes the data word at the given index as an address.
    pub fn address(&self, index: usize) -> Result<Address, DecodeError> {
        Ok(Address::from_word(self.word(index)?))
    }

    /// Decodes the data word at the given index as an unsigned integer.
    pub fn u256(&self, index: usize) -> Result<U256, DecodeError> {
        Ok(U256::from_be_bytes(self.word(index)?.0))
    }

    /// Decodes the data word at the given index as a 32-byte hash.
    pub fn b256(&self, index: usize) -> Result<B256, DecodeError> {
        self.word(index)
    }

    /// Decodes the data word at the given index as a boolean.
    pub fn bool(&self, index: usize) -> Result<bool, DecodeError> {
        Ok(self.u256(index)? != U256::ZERO)
    }

    /// Number of whole 32-byte words in the data section.
    #[must_use]
    pub const fn word_count(&self) -> usize {
        self.data.len() / 32
    }

    /// Decodes a dynamic `uint256[]` whose offset header sits at the
    /// given word index.
    pub fn u256_array(&self, index: usize) -> Result<Vec<U256>, DecodeError> {
        let offset = self.u256(index)?;
        let offset = usize::try_from(offset).map_err(|_| DecodeError::MalformedArray(index))?;
        if offset % 32 != 0 {
            return Err(DecodeError::MalformedArray(index));
        }
        let length_word = offset / 32;
        let length = self.u256(length_word)?;
        let length = usize::try_from(length).map_err(|_| DecodeError::MalformedArray(index))?;

        // The length word is attacker-controlled; bound it by the data
        // actually present before allocating.
        let end = length_word.checked_add(1).and_then(|s| s.checked_add(length));
        if end.is_none_or(|end| end > self.word_count()) {
            return Err(DecodeError::MalformedArray(index));
        }

        let mut values = Vec::with_capacity(length);
        for i in 0..length {
            values.push(self.u256(length_word + 1 + i)?);
        }
        Ok(values)
    }
}
