// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire formats exchanged between both parties.
//!
//! Message header (version 1, 41 bytes):
//!
//! ```text
//! 0x01 || sender public key (32) || message number (u32 BE) || sequence number (u32 BE)
//! ```
//!
//! Encrypted message:
//!
//! ```text
//! header (41) || body length (u32 BE) || body
//! ```
//!
//! The body is the CBOR encoding of the message fields, each wrapped under the message key with
//! the encoded header as associated data.
//! Everything else travels in an [`Envelope`], encoded as CBOR.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::codec::EncMessageFields;
use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey};
use crate::ids::{ContactId, ConversationId, Timestamp};
use crate::key_wrap::Wrapped;

pub const HEADER_VERSION: u8 = 0x01;

pub const HEADER_SIZE: usize = 1 + PUBLIC_KEY_SIZE + 4 + 4;

const LENGTH_SIZE: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    /// Current ratchet public key of the sender.
    pub public_key: PublicKey,

    /// Index inside the sender's current sending chain.
    pub message_number: u32,

    /// Number of messages the sender sent before this one, over all chains.
    pub sequence_number: u32,
}

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = HEADER_VERSION;
        bytes[1..33].copy_from_slice(self.public_key.as_bytes());
        bytes[33..37].copy_from_slice(&self.message_number.to_be_bytes());
        bytes[37..41].copy_from_slice(&self.sequence_number.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != HEADER_SIZE {
            return Err(WireError::InvalidLength(HEADER_SIZE, bytes.len()));
        }
        if bytes[0] != HEADER_VERSION {
            return Err(WireError::UnsupportedVersion(bytes[0]));
        }

        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&bytes[1..33]);
        let mut message_number = [0u8; 4];
        message_number.copy_from_slice(&bytes[33..37]);
        let mut sequence_number = [0u8; 4];
        sequence_number.copy_from_slice(&bytes[37..41]);

        Ok(Self {
            public_key: PublicKey::from_bytes(public_key),
            message_number: u32::from_be_bytes(message_number),
            sequence_number: u32::from_be_bytes(sequence_number),
        })
    }
}

/// Message header together with the body it protects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub header: MessageHeader,
    pub body: EncMessageFields,
}

impl EncryptedMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let body = encode_cbor(&self.body)?;
        let body_length = u32::try_from(body.len()).map_err(|_| WireError::TooLarge)?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + LENGTH_SIZE + body.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&body_length.to_be_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_SIZE + LENGTH_SIZE {
            return Err(WireError::InvalidLength(
                HEADER_SIZE + LENGTH_SIZE,
                bytes.len(),
            ));
        }
        let header = MessageHeader::from_bytes(&bytes[..HEADER_SIZE])?;

        let mut body_length = [0u8; LENGTH_SIZE];
        body_length.copy_from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + LENGTH_SIZE]);
        let body_length = u32::from_be_bytes(body_length) as usize;

        let body = &bytes[HEADER_SIZE + LENGTH_SIZE..];
        if body.len() != body_length {
            return Err(WireError::InvalidLength(body_length, body.len()));
        }

        Ok(Self {
            header,
            body: decode_cbor(body)?,
        })
    }
}

/// Outer container of everything handed to the contact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// Sent once by the initiator, usually as a QR code.
    Invitation(Invitation),

    /// Sent while the sender still holds handshake data, i.e. before the contact's first
    /// reply arrived. Carries the handshake key so the receiver can agree on the shared key.
    Handshake {
        conversation_id: ConversationId,
        handshake_public_key: PublicKey,
        recipient_id: ContactId,
        #[serde(with = "serde_bytes")]
        message: Vec<u8>,
    },

    /// A [`SealedPayload`] wrapped under the contact shared key.
    Sealed(Wrapped<SealedPayload>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub conversation_id: ConversationId,
    pub ratchet_public_key: PublicKey,
    pub handshake_public_key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealedPayload {
    Message {
        recipient_id: ContactId,
        /// Bytes of an [`EncryptedMessage`].
        #[serde(with = "serde_bytes")]
        message: Vec<u8>,
        /// When the sender last reset this conversation.
        reset_at: Option<Timestamp>,
    },

    /// Asks the contact to restart the ratchet from a new public key.
    ResetInvitation {
        recipient_id: ContactId,
        ratchet_public_key: PublicKey,
        reset_at: Timestamp,
    },
}

impl SealedPayload {
    pub fn recipient_id(&self) -> ContactId {
        match self {
            SealedPayload::Message { recipient_id, .. } => *recipient_id,
            SealedPayload::ResetInvitation { recipient_id, .. } => *recipient_id,
        }
    }
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(encode_cbor(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(decode_cbor(bytes)?)
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("expected {0} bytes, got {1}")]
    InvalidLength(usize, usize),

    #[error("unsupported header version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("message body too large")]
    TooLarge,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::codec::EncMessageFields;
    use crate::crypto::Rng;
    use crate::crypto::x25519::{KeyPair, PublicKey};
    use crate::ids::{ContactId, ConversationId};
    use crate::key_wrap::Wrapped;

    use super::{
        EncryptedMessage, Envelope, HEADER_SIZE, Invitation, MessageHeader, WireError,
    };

    #[test]
    fn fixed_header_layout() {
        let header = MessageHeader {
            public_key: PublicKey::from_bytes([7; 32]),
            message_number: 1,
            sequence_number: 0x0102_0304,
        };
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..33], &[7; 32]);
        assert_eq!(&bytes[33..37], &[0, 0, 0, 1]);
        assert_eq!(&bytes[37..41], &[1, 2, 3, 4]);
        assert_eq!(MessageHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn invalid_header() {
        let header = MessageHeader {
            public_key: PublicKey::from_bytes([7; 32]),
            message_number: 1,
            sequence_number: 1,
        };
        let mut bytes = header.to_bytes();

        assert_matches!(
            MessageHeader::from_bytes(&bytes[..40]),
            Err(WireError::InvalidLength(41, 40))
        );

        bytes[0] = 0x02;
        assert_matches!(
            MessageHeader::from_bytes(&bytes),
            Err(WireError::UnsupportedVersion(0x02))
        );
    }

    #[test]
    fn body_length_must_match() {
        let message = EncryptedMessage {
            header: MessageHeader {
                public_key: PublicKey::from_bytes([7; 32]),
                message_number: 0,
                sequence_number: 0,
            },
            body: EncMessageFields {
                content: Wrapped::from_bytes(vec![9; 10]),
                sent_at: Wrapped::from_bytes(vec![8; 10]),
                channel: None,
                linked_item_id: None,
            },
        };
        let bytes = message.to_bytes().unwrap();
        assert_eq!(EncryptedMessage::from_bytes(&bytes).unwrap(), message);

        let body_length = bytes.len() - HEADER_SIZE - 4;
        assert_matches!(
            EncryptedMessage::from_bytes(&bytes[..bytes.len() - 1]),
            Err(WireError::InvalidLength(expected, found))
                if expected == body_length && found == body_length - 1
        );
    }

    #[test]
    fn envelope_decoding() {
        let rng = Rng::from_seed([1; 32]);
        let invitation = Envelope::Invitation(Invitation {
            conversation_id: ConversationId::random(&rng).unwrap(),
            ratchet_public_key: *KeyPair::generate(&rng).unwrap().public_key(),
            handshake_public_key: *KeyPair::generate(&rng).unwrap().public_key(),
        });
        let bytes = invitation.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), invitation);

        let handshake = Envelope::Handshake {
            conversation_id: ConversationId::random(&rng).unwrap(),
            handshake_public_key: *KeyPair::generate(&rng).unwrap().public_key(),
            recipient_id: ContactId::random(&rng).unwrap(),
            message: vec![1, 2, 3],
        };
        let bytes = handshake.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), handshake);

        assert_matches!(Envelope::from_bytes(&[0xff, 0x00]), Err(WireError::Decode(_)));
    }
}
