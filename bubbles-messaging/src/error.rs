// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use bubbles_core::crypto::RngError;
use bubbles_core::handshake::HandshakeError;
use bubbles_core::ids::{ContactId, MessageId};
use bubbles_core::key_wrap::KeyWrapError;
use bubbles_core::ratchet::{MessageKeyId, RatchetError};
use bubbles_core::wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    /// Ratchet state can not be advanced. Stored state is corrupted or the contact sent
    /// something we can't follow, retrying won't help.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailure(String),

    /// A stored or received value could not be unwrapped with the key we have for it.
    #[error("decryption failed: {0}")]
    DecryptionFailure(#[from] KeyWrapError),

    /// No sending chain yet, the contact has to reply first.
    #[error("conversation has no sending chain yet")]
    NotReady,

    #[error("no conversation stored for contact {0}")]
    ConversationNotFound(ContactId),

    /// Replayed or duplicated message.
    #[error("message key {0:?} was already consumed")]
    KeyAlreadyConsumed(MessageKeyId),

    #[error("contact {0} not found")]
    ContactNotFound(ContactId),

    #[error("no local key stored for contact {0}")]
    MissingContactKey(ContactId),

    #[error("handshake with contact {0} did not complete yet")]
    MissingSharedKey(ContactId),

    #[error("no handshake data stored for contact {0}")]
    MissingHandshake(ContactId),

    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error("message does not belong to any known contact")]
    NoMatchingContact,

    #[error("vault is locked")]
    VaultLocked,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("store error: {0}")]
    Store(String),
}

impl MessagingError {
    pub(crate) fn store<E: Error>(err: E) -> Self {
        MessagingError::Store(err.to_string())
    }
}

impl From<RatchetError> for MessagingError {
    fn from(err: RatchetError) -> Self {
        match err {
            RatchetError::NotReady => MessagingError::NotReady,
            RatchetError::KeyAlreadyConsumed(key_id) => {
                MessagingError::KeyAlreadyConsumed(key_id)
            }
            RatchetError::Rng(err) => MessagingError::Rng(err),
            err => MessagingError::KeyDerivationFailure(err.to_string()),
        }
    }
}

impl From<HandshakeError> for MessagingError {
    fn from(err: HandshakeError) -> Self {
        MessagingError::KeyDerivationFailure(err.to_string())
    }
}
