// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use bubbles_core::contact::{Contact, MessageOrder, QueuedMessage, SafeMessage};
use bubbles_core::conversation::EncConversation;
use bubbles_core::handshake::EncHandshakeData;
use bubbles_core::ids::{ContactId, ConversationId, MessageId};
use bubbles_core::keys::{EncContactLocalKey, EncMessageKey, MasterKey, QueueKey};
use bubbles_core::ratchet::MessageKeyId;

/// Contacts of all vaults.
pub trait ContactStore {
    type Error: Error;

    /// Inserts a new contact or replaces the stored one with the same id.
    fn save_contact(&self, contact: Contact) -> impl Future<Output = Result<(), Self::Error>>;

    fn get_contact(
        &self,
        id: &ContactId,
    ) -> impl Future<Output = Result<Option<Contact>, Self::Error>>;

    /// Looks up the contact sharing the given conversation id with us.
    fn contact_by_conversation_id(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<Option<Contact>, Self::Error>>;

    fn contacts(&self) -> impl Future<Output = Result<Vec<Contact>, Self::Error>>;

    /// Removes the contact together with everything stored for it: local key, conversation,
    /// skipped message keys, handshake data, messages and queued messages.
    ///
    /// Returns `false` if no such contact existed.
    fn remove_contact(&self, id: &ContactId) -> impl Future<Output = Result<bool, Self::Error>>;
}

/// Contact local keys, wrapped under the master key.
pub trait ContactKeyStore {
    type Error: Error;

    fn save_contact_key(
        &self,
        id: &ContactId,
        key: EncContactLocalKey,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    fn get_contact_key(
        &self,
        id: &ContactId,
    ) -> impl Future<Output = Result<Option<EncContactLocalKey>, Self::Error>>;
}

/// Access to the vault master key, usually backed by a platform keystore.
pub trait MasterKeyProvider {
    type Error: Error;

    /// Returns `None` while the vault is locked.
    fn master_key(&self) -> impl Future<Output = Result<Option<MasterKey>, Self::Error>>;
}

/// Everything a ratchet step changes, written at once.
///
/// Starting a conversation also carries our handshake data and, for a new contact, the contact
/// and its local key, so the contact never shows up without its conversation.
#[derive(Clone, Debug)]
pub struct RatchetWrite {
    pub conversation: EncConversation,
    pub skipped_keys: Vec<(MessageKeyId, EncMessageKey)>,
    pub contact: Option<Contact>,
    pub contact_key: Option<EncContactLocalKey>,
    pub handshake: Option<EncHandshakeData>,
}

impl RatchetWrite {
    pub fn new(conversation: EncConversation) -> Self {
        Self {
            conversation,
            skipped_keys: Vec::new(),
            contact: None,
            contact_key: None,
            handshake: None,
        }
    }

    pub fn skipped_keys(mut self, skipped_keys: Vec<(MessageKeyId, EncMessageKey)>) -> Self {
        self.skipped_keys = skipped_keys;
        self
    }

    pub fn contact(mut self, contact: Contact, key: EncContactLocalKey) -> Self {
        self.contact = Some(contact);
        self.contact_key = Some(key);
        self
    }

    pub fn handshake(mut self, handshake: EncHandshakeData) -> Self {
        self.handshake = Some(handshake);
        self
    }
}

/// Conversation state and skipped message keys of every contact.
///
/// Writes are atomic: readers either see the state before or after a call, never parts of it.
pub trait RatchetStore {
    type Error: Error;

    fn get_conversation(
        &self,
        id: &ContactId,
    ) -> impl Future<Output = Result<Option<EncConversation>, Self::Error>>;

    /// Replaces the conversation and adds the skipped keys of one ratchet step. Contact, contact
    /// key and handshake data are replaced as well when the write carries them.
    fn commit_ratchet(
        &self,
        id: &ContactId,
        write: RatchetWrite,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Removes and returns a skipped message key. Every key can be taken once.
    fn take_skipped_key(
        &self,
        id: &ContactId,
        key_id: &MessageKeyId,
    ) -> impl Future<Output = Result<Option<EncMessageKey>, Self::Error>>;

    /// Starts over: replaces the contact (carrying the new reset marker) and the conversation,
    /// and drops all skipped keys and handshake data of this contact.
    fn reset_conversation(
        &self,
        contact: Contact,
        conversation: EncConversation,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Handshake data, held until the contact's first reply arrived.
pub trait HandshakeStore {
    type Error: Error;

    fn save_handshake(
        &self,
        id: &ContactId,
        handshake: EncHandshakeData,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    fn get_handshake(
        &self,
        id: &ContactId,
    ) -> impl Future<Output = Result<Option<EncHandshakeData>, Self::Error>>;

    /// Returns `false` if there was nothing to delete.
    fn delete_handshake(&self, id: &ContactId)
    -> impl Future<Output = Result<bool, Self::Error>>;
}

/// The process-wide queue key.
pub trait QueueKeyStore {
    type Error: Error;

    fn get_queue_key(&self) -> impl Future<Output = Result<Option<QueueKey>, Self::Error>>;

    /// Stores `key` unless a queue key exists already. Returns the key which is stored after
    /// the call, so concurrent callers all end up with the same key.
    fn insert_queue_key_if_absent(
        &self,
        key: QueueKey,
    ) -> impl Future<Output = Result<QueueKey, Self::Error>>;
}

/// Stored and queued messages.
pub trait MessageStore {
    type Error: Error;

    fn save_message(&self, message: SafeMessage)
    -> impl Future<Output = Result<(), Self::Error>>;

    fn get_message(
        &self,
        id: &MessageId,
    ) -> impl Future<Output = Result<Option<SafeMessage>, Self::Error>>;

    /// Returns `false` if the message does not exist.
    fn mark_read(&self, id: &MessageId) -> impl Future<Output = Result<bool, Self::Error>>;

    fn enqueue(&self, message: QueuedMessage) -> impl Future<Output = Result<(), Self::Error>>;

    /// Queued messages of one contact, oldest first.
    fn queued_messages(
        &self,
        contact_id: &ContactId,
    ) -> impl Future<Output = Result<Vec<QueuedMessage>, Self::Error>>;

    fn remove_queued(&self, id: &MessageId) -> impl Future<Output = Result<bool, Self::Error>>;
}

/// Position queries on the messages of a contact, ordered from most to least recent. Messages
/// listed in `excluded` are skipped as if they didn't exist.
pub trait MessageOrderRepository {
    type Error: Error;

    fn most_recent(
        &self,
        contact_id: &ContactId,
        excluded: &[MessageId],
    ) -> impl Future<Output = Result<Option<MessageOrder>, Self::Error>>;

    fn least_recent(
        &self,
        contact_id: &ContactId,
        excluded: &[MessageId],
    ) -> impl Future<Output = Result<Option<MessageOrder>, Self::Error>>;

    fn count(
        &self,
        contact_id: &ContactId,
        excluded: &[MessageId],
    ) -> impl Future<Output = Result<usize, Self::Error>>;

    /// Message at `position`, counted from the most recent one.
    fn at(
        &self,
        contact_id: &ContactId,
        position: usize,
        excluded: &[MessageId],
    ) -> impl Future<Output = Result<Option<MessageOrder>, Self::Error>>;
}
