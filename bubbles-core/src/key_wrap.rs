// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated symmetric wrapping of individual values.
//!
//! Every persisted or transmitted field is wrapped on its own, so a single corrupted field does
//! not take the rest of a record with it. The wrapped format is:
//!
//! ```text
//! version (1 byte, 0x01) || nonce (24 bytes) || XChaCha20-Poly1305(type tag || payload)
//! ```
//!
//! The version byte, followed by optional caller data (e.g. the message header a field travels
//! with), is bound as associated data. The type tag lives inside the authenticated plaintext,
//! unwrapping as a different type than was wrapped fails with [`KeyWrapError::UnexpectedType`].
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::cbor::{EncodeError, decode_cbor, encode_cbor};
use crate::crypto::aead::{AEAD_NONCE_SIZE, AeadNonce, aead_decrypt, aead_encrypt};
use crate::crypto::{Rng, RngError};
use crate::ids::{ContactId, ConversationId, ItemId, MessageId, Timestamp, VaultId};
use crate::keys::WrappingKey;

const VERSION: u8 = 0x01;

const HEADER_SIZE: usize = 1 + AEAD_NONCE_SIZE;

/// Plaintext encodings which can be wrapped.
pub trait Wrappable: Sized {
    /// One-byte discriminant authenticated together with the payload.
    const TAG: u8;

    fn to_payload(&self) -> Vec<u8>;

    fn from_payload(payload: &[u8]) -> Option<Self>;
}

/// Ciphertext of a wrapped `T`.
///
/// The type parameter only documents what is expected inside; the actual check happens when
/// unwrapping.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Wrapped<T> {
    #[serde(with = "serde_bytes")]
    bytes: Vec<u8>,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> Wrapped<T> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl<T> Clone for Wrapped<T> {
    fn clone(&self) -> Self {
        Self::from_bytes(self.bytes.clone())
    }
}

impl<T> PartialEq for Wrapped<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T> Eq for Wrapped<T> {}

impl<T> fmt::Debug for Wrapped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Wrapped").field(&hex::encode(&self.bytes)).finish()
    }
}

pub fn wrap<T: Wrappable>(
    value: &T,
    key: &impl WrappingKey,
    rng: &Rng,
) -> Result<Wrapped<T>, KeyWrapError> {
    wrap_bound(value, key, &[], rng)
}

pub fn unwrap<T: Wrappable>(
    wrapped: &Wrapped<T>,
    key: &impl WrappingKey,
) -> Result<T, KeyWrapError> {
    unwrap_bound(wrapped, key, &[])
}

/// Wraps a value bound to `associated_data`. Unwrapping needs the same bytes.
pub fn wrap_bound<T: Wrappable>(
    value: &T,
    key: &impl WrappingKey,
    associated_data: &[u8],
    rng: &Rng,
) -> Result<Wrapped<T>, KeyWrapError> {
    let payload = Zeroizing::new(value.to_payload());
    seal(T::TAG, &payload, key, associated_data, rng).map(Wrapped::from_bytes)
}

pub fn unwrap_bound<T: Wrappable>(
    wrapped: &Wrapped<T>,
    key: &impl WrappingKey,
    associated_data: &[u8],
) -> Result<T, KeyWrapError> {
    let payload = open(T::TAG, wrapped.as_bytes(), key, associated_data)?;
    T::from_payload(&payload).ok_or(KeyWrapError::InvalidPayload(T::TAG))
}

/// Wraps a structured value (conversation state, handshake data, message fields) as one CBOR
/// record.
pub fn wrap_record<T: Serialize>(
    value: &T,
    key: &impl WrappingKey,
    rng: &Rng,
) -> Result<Wrapped<T>, KeyWrapError> {
    let payload = Zeroizing::new(encode_cbor(value)?);
    seal(RECORD_TAG, &payload, key, &[], rng).map(Wrapped::from_bytes)
}

pub fn unwrap_record<T: for<'a> Deserialize<'a>>(
    wrapped: &Wrapped<T>,
    key: &impl WrappingKey,
) -> Result<T, KeyWrapError> {
    let payload = open(RECORD_TAG, wrapped.as_bytes(), key, &[])?;
    decode_cbor(&payload[..]).map_err(|_| KeyWrapError::InvalidPayload(RECORD_TAG))
}

fn seal(
    tag: u8,
    payload: &[u8],
    key: &impl WrappingKey,
    associated_data: &[u8],
    rng: &Rng,
) -> Result<Vec<u8>, KeyWrapError> {
    let nonce: AeadNonce = rng.random_array()?;

    let mut plaintext = Zeroizing::new(Vec::with_capacity(1 + payload.len()));
    plaintext.push(tag);
    plaintext.extend_from_slice(payload);

    let ciphertext = aead_encrypt(
        key.wrapping_key().as_bytes(),
        &plaintext,
        nonce,
        Some(&aad(associated_data)),
    )
    .map_err(|_| KeyWrapError::Encrypt)?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    bytes.push(VERSION);
    bytes.extend_from_slice(&nonce);
    bytes.extend_from_slice(&ciphertext);
    Ok(bytes)
}

fn open(
    expected_tag: u8,
    bytes: &[u8],
    key: &impl WrappingKey,
    associated_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KeyWrapError> {
    if bytes.len() < HEADER_SIZE || bytes[0] != VERSION {
        return Err(KeyWrapError::Unauthenticated);
    }

    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce.copy_from_slice(&bytes[1..HEADER_SIZE]);

    let mut plaintext = Zeroizing::new(
        aead_decrypt(
            key.wrapping_key().as_bytes(),
            &bytes[HEADER_SIZE..],
            nonce,
            Some(&aad(associated_data)),
        )
        .map_err(|_| KeyWrapError::Unauthenticated)?,
    );

    let Some(&tag) = plaintext.first() else {
        return Err(KeyWrapError::Unauthenticated);
    };
    if tag != expected_tag {
        return Err(KeyWrapError::UnexpectedType {
            expected: expected_tag,
            found: tag,
        });
    }

    plaintext.remove(0);
    Ok(plaintext)
}

fn aad(associated_data: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + associated_data.len());
    aad.push(VERSION);
    aad.extend_from_slice(associated_data);
    aad
}

#[derive(Debug, Error)]
pub enum KeyWrapError {
    /// Wrong key, truncated or tampered ciphertext. The cause is deliberately not reported.
    #[error("wrapped value could not be authenticated")]
    Unauthenticated,

    #[error("wrapped value has type tag {found:#04x}, expected {expected:#04x}")]
    UnexpectedType { expected: u8, found: u8 },

    #[error("authenticated payload is not a valid encoding for type tag {0:#04x}")]
    InvalidPayload(u8),

    #[error("could not encrypt value")]
    Encrypt,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Rng(#[from] RngError),
}

impl Wrappable for String {
    const TAG: u8 = 0x01;

    fn to_payload(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        String::from_utf8(payload.to_vec()).ok()
    }
}

impl Wrappable for bool {
    const TAG: u8 = 0x02;

    fn to_payload(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }
}

impl Wrappable for u32 {
    const TAG: u8 = 0x03;

    fn to_payload(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        Some(u32::from_be_bytes(payload.try_into().ok()?))
    }
}

impl Wrappable for u64 {
    const TAG: u8 = 0x04;

    fn to_payload(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        Some(u64::from_be_bytes(payload.try_into().ok()?))
    }
}

macro_rules! wrappable_uuid {
    ($($name:ident),+) => {
        $(
            impl Wrappable for $name {
                const TAG: u8 = 0x05;

                fn to_payload(&self) -> Vec<u8> {
                    self.as_bytes().to_vec()
                }

                fn from_payload(payload: &[u8]) -> Option<Self> {
                    let bytes: [u8; 16] = payload.try_into().ok()?;
                    Some(uuid::Uuid::from_bytes(bytes).into())
                }
            }
        )+
    };
}

wrappable_uuid!(ContactId, VaultId, MessageId, ConversationId, ItemId);

impl Wrappable for Timestamp {
    const TAG: u8 = 0x06;

    fn to_payload(&self) -> Vec<u8> {
        self.as_millis().to_be_bytes().to_vec()
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        Some(Timestamp::from_millis(u64::from_be_bytes(
            payload.try_into().ok()?,
        )))
    }
}

impl Wrappable for Vec<u8> {
    const TAG: u8 = 0x07;

    fn to_payload(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        Some(payload.to_vec())
    }
}

/// Tag shared by all symmetric keys (see [`crate::keys`]).
pub(crate) const KEY_TAG: u8 = 0x08;

const RECORD_TAG: u8 = 0x09;
