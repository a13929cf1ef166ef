// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encode and decode values in [CBOR] format.
//!
//! Conversation state, handshake data and the outer message envelope are all stored or exchanged
//! as CBOR before being wrapped.
//!
//! [CBOR]: https://cbor.io/
use std::io::Read;

use ciborium::de::Error as DeserializeError;
use ciborium::ser::Error as SerializeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

pub fn decode_cbor<T: for<'a> Deserialize<'a>, R: Read>(reader: R) -> Result<T, DecodeError> {
    Ok(ciborium::from_reader::<T, R>(reader)?)
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("io error while writing cbor: {0}")]
    Io(std::io::Error),

    #[error("value can not be encoded as cbor: {0}")]
    Value(String),
}

impl From<SerializeError<std::io::Error>> for EncodeError {
    fn from(value: SerializeError<std::io::Error>) -> Self {
        match value {
            SerializeError::Io(err) => EncodeError::Io(err),
            SerializeError::Value(err) => EncodeError::Value(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("io error while reading cbor: {0}")]
    Io(std::io::Error),

    /// Syntax error at the given offset.
    #[error("invalid cbor at position {0}")]
    Syntax(usize),

    /// The bytes were valid CBOR but did not match the expected shape.
    #[error("unexpected cbor value at position {0:?}: {1}")]
    Semantic(Option<usize>, String),

    #[error("recursion limit exceeded while decoding cbor")]
    RecursionLimitExceeded,
}

impl From<DeserializeError<std::io::Error>> for DecodeError {
    fn from(value: DeserializeError<std::io::Error>) -> Self {
        match value {
            DeserializeError::Io(err) => DecodeError::Io(err),
            DeserializeError::Syntax(offset) => DecodeError::Syntax(offset),
            DeserializeError::Semantic(offset, description) => {
                DecodeError::Semantic(offset, description)
            }
            DeserializeError::RecursionLimitExceeded => DecodeError::RecursionLimitExceeded,
        }
    }
}
