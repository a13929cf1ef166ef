// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ratchet state of a conversation with one contact.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Secret;
use crate::crypto::x25519::{KeyPair, PublicKey};
use crate::ids::ContactId;
use crate::key_wrap::Wrapped;

pub const CHAIN_KEY_SIZE: usize = 32;

pub type RootKey = Secret<CHAIN_KEY_SIZE>;

pub type ChainKey = Secret<CHAIN_KEY_SIZE>;

/// Conversation state wrapped under the contact local key.
pub type EncConversation = Wrapped<Conversation>;

/// Double ratchet state.
///
/// Only the personal key pair is always present. The optional fields appear in a fixed order
/// while the handshake progresses: a root key only exists once the contact's public key is
/// known, chain keys only exist once a root key was derived and the receiving counters only
/// exist together with a receiving chain. Every `Conversation` value upholds these rules, both
/// when assembled from [`ConversationParts`] and when decoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConversationParts")]
pub struct Conversation {
    id: ContactId,
    personal_key_pair: KeyPair,
    next_message_number: u32,
    next_sequence_number: u32,
    root_key: Option<RootKey>,
    sending_chain_key: Option<ChainKey>,
    receiving_chain_key: Option<ChainKey>,
    last_contact_public_key: Option<PublicKey>,
    received_last_message_number: Option<u32>,
    receiving_chain_start: Option<u32>,
}

/// Unchecked fields of a [`Conversation`].
#[derive(Clone, Debug, Deserialize)]
pub struct ConversationParts {
    pub id: ContactId,
    pub personal_key_pair: KeyPair,
    pub next_message_number: u32,
    pub next_sequence_number: u32,
    pub root_key: Option<RootKey>,
    pub sending_chain_key: Option<ChainKey>,
    pub receiving_chain_key: Option<ChainKey>,
    pub last_contact_public_key: Option<PublicKey>,
    pub received_last_message_number: Option<u32>,
    pub receiving_chain_start: Option<u32>,
}

impl ConversationParts {
    /// Parts of a conversation which only holds a key pair.
    pub fn new(id: ContactId, personal_key_pair: KeyPair) -> Self {
        Self {
            id,
            personal_key_pair,
            next_message_number: 0,
            next_sequence_number: 0,
            root_key: None,
            sending_chain_key: None,
            receiving_chain_key: None,
            last_contact_public_key: None,
            received_last_message_number: None,
            receiving_chain_start: None,
        }
    }
}

impl TryFrom<ConversationParts> for Conversation {
    type Error = ConversationError;

    fn try_from(parts: ConversationParts) -> Result<Self, Self::Error> {
        let has_chain = parts.sending_chain_key.is_some() || parts.receiving_chain_key.is_some();
        if has_chain && parts.root_key.is_none() {
            return Err(ConversationError::ChainWithoutRoot);
        }

        if parts.root_key.is_some() && parts.last_contact_public_key.is_none() {
            return Err(ConversationError::RootWithoutContactKey);
        }

        let has_receive_counters = parts.received_last_message_number.is_some()
            || parts.receiving_chain_start.is_some();
        if has_receive_counters && parts.receiving_chain_key.is_none() {
            return Err(ConversationError::CountersWithoutReceivingChain);
        }

        if parts.sending_chain_key.is_none() && parts.next_message_number != 0 {
            return Err(ConversationError::CountersWithoutSendingChain(
                parts.next_message_number,
            ));
        }

        Ok(Self {
            id: parts.id,
            personal_key_pair: parts.personal_key_pair,
            next_message_number: parts.next_message_number,
            next_sequence_number: parts.next_sequence_number,
            root_key: parts.root_key,
            sending_chain_key: parts.sending_chain_key,
            receiving_chain_key: parts.receiving_chain_key,
            last_contact_public_key: parts.last_contact_public_key,
            received_last_message_number: parts.received_last_message_number,
            receiving_chain_start: parts.receiving_chain_start,
        })
    }
}

impl From<Conversation> for ConversationParts {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            personal_key_pair: conversation.personal_key_pair,
            next_message_number: conversation.next_message_number,
            next_sequence_number: conversation.next_sequence_number,
            root_key: conversation.root_key,
            sending_chain_key: conversation.sending_chain_key,
            receiving_chain_key: conversation.receiving_chain_key,
            last_contact_public_key: conversation.last_contact_public_key,
            received_last_message_number: conversation.received_last_message_number,
            receiving_chain_start: conversation.receiving_chain_start,
        }
    }
}

impl Conversation {
    /// Conversation holding nothing but a fresh key pair. This is where the initiating side
    /// starts, and where both sides restart after a reset.
    pub fn new(id: ContactId, personal_key_pair: KeyPair) -> Self {
        Self {
            id,
            personal_key_pair,
            next_message_number: 0,
            next_sequence_number: 0,
            root_key: None,
            sending_chain_key: None,
            receiving_chain_key: None,
            last_contact_public_key: None,
            received_last_message_number: None,
            receiving_chain_start: None,
        }
    }

    pub fn id(&self) -> ContactId {
        self.id
    }

    pub fn personal_key_pair(&self) -> &KeyPair {
        &self.personal_key_pair
    }

    pub fn public_key(&self) -> &PublicKey {
        self.personal_key_pair.public_key()
    }

    pub fn next_message_number(&self) -> u32 {
        self.next_message_number
    }

    pub fn next_sequence_number(&self) -> u32 {
        self.next_sequence_number
    }

    pub fn last_contact_public_key(&self) -> Option<&PublicKey> {
        self.last_contact_public_key.as_ref()
    }

    pub fn received_last_message_number(&self) -> Option<u32> {
        self.received_last_message_number
    }

    pub fn receiving_chain_start(&self) -> Option<u32> {
        self.receiving_chain_start
    }

    pub fn has_root_key(&self) -> bool {
        self.root_key.is_some()
    }

    pub fn has_sending_chain(&self) -> bool {
        self.sending_chain_key.is_some()
    }

    pub fn has_receiving_chain(&self) -> bool {
        self.receiving_chain_key.is_some()
    }

    pub(crate) fn root_key(&self) -> Option<&RootKey> {
        self.root_key.as_ref()
    }

    pub(crate) fn sending_chain_key(&self) -> Option<&ChainKey> {
        self.sending_chain_key.as_ref()
    }

    pub(crate) fn receiving_chain_key(&self) -> Option<&ChainKey> {
        self.receiving_chain_key.as_ref()
    }

    pub fn into_parts(self) -> ConversationParts {
        self.into()
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation has a chain key but no root key")]
    ChainWithoutRoot,

    #[error("conversation has a root key but no contact public key")]
    RootWithoutContactKey,

    #[error("conversation has receiving counters but no receiving chain")]
    CountersWithoutReceivingChain,

    #[error("conversation has message number {0} but no sending chain")]
    CountersWithoutSendingChain(u32),
}
