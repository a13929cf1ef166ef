// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic core of Bubbles, serverless end-to-end encrypted conversations between two
//! parties exchanging messages out-of-band.
//!
//! This crate is free of I/O. It provides:
//!
//! - [`key_wrap`]: authenticated wrapping of single values under a symmetric key
//! - [`ratchet`]: double ratchet transitions on a [`Conversation`]
//! - [`handshake`]: agreement on the key shared with a contact
//! - [`codec`]: field-wise message encryption tolerating corrupted fields
//! - [`state`]: negotiation phase of a conversation, derived from stored state
//! - [`wire`]: message header and envelope formats
//!
//! Persistence lives in `bubbles-store`, the stateful engine in `bubbles-messaging`.
pub mod cbor;
pub mod codec;
pub mod contact;
pub mod conversation;
pub mod crypto;
pub mod handshake;
pub mod ids;
pub mod key_wrap;
pub mod keys;
pub mod ratchet;
pub mod state;
pub mod wire;

pub use codec::{EncMessageFields, MessageCodec, MessageContent, PlainMessageData};
pub use contact::{
    Contact, MessageDirection, MessageOrder, QueuedMessage, SafeMessage, SharingMode,
};
pub use conversation::{Conversation, ConversationError, EncConversation};
pub use crypto::{Rng, RngError};
pub use handshake::{EncHandshakeData, HandshakeData};
pub use ids::{ContactId, ConversationId, ItemId, MessageId, Timestamp, VaultId};
pub use key_wrap::{KeyWrapError, Wrapped};
pub use keys::{ContactLocalKey, MasterKey, MessageKey, QueueKey, SharedKey, WrappingKey};
pub use ratchet::{DoubleRatchet, MessageKeyId, RatchetError};
pub use state::{ConversationNotFound, ConversationState, resolve_conversation_state};
pub use wire::{EncryptedMessage, Envelope, MessageHeader};
