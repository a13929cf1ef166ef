// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for contacts, ratchet state and messages.
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bubbles_core::contact::{Contact, MessageOrder, QueuedMessage, SafeMessage};
use bubbles_core::conversation::EncConversation;
use bubbles_core::handshake::EncHandshakeData;
use bubbles_core::ids::{ContactId, ConversationId, MessageId};
use bubbles_core::keys::{EncContactLocalKey, EncMessageKey, MasterKey, QueueKey};
use bubbles_core::ratchet::MessageKeyId;

use crate::traits::{
    ContactKeyStore, ContactStore, HandshakeStore, MasterKeyProvider, MessageOrderRepository,
    MessageStore, QueueKeyStore, RatchetStore, RatchetWrite,
};

#[derive(Debug, Default)]
pub struct InnerMemoryStore {
    master_key: Option<MasterKey>,
    queue_key: Option<QueueKey>,
    contacts: HashMap<ContactId, Contact>,
    contact_keys: HashMap<ContactId, EncContactLocalKey>,
    conversations: HashMap<ContactId, EncConversation>,
    skipped_keys: HashMap<ContactId, HashMap<MessageKeyId, EncMessageKey>>,
    handshakes: HashMap<ContactId, EncHandshakeData>,
    messages: HashMap<MessageId, SafeMessage>,
    queue: Vec<QueuedMessage>,
}

impl InnerMemoryStore {
    /// Number of cached skipped keys for a contact.
    pub fn skipped_keys_len(&self, id: &ContactId) -> usize {
        self.skipped_keys.get(id).map_or(0, HashMap::len)
    }

    /// Messages of a contact from most to least recent, without the excluded ones.
    fn ordered(&self, contact_id: &ContactId, excluded: &[MessageId]) -> Vec<MessageOrder> {
        let mut orders: Vec<MessageOrder> = self
            .messages
            .values()
            .filter(|message| &message.contact_id == contact_id)
            .filter(|message| !excluded.contains(&message.id))
            .map(MessageOrder::from)
            .collect();
        orders.sort_by(|a, b| b.order.total_cmp(&a.order));
        orders
    }
}

/// An in-memory store implementing every store trait.
///
/// Data is lost when the process ends, use this in development and tests. Clones share the same
/// underlying state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<InnerMemoryStore>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store of an unlocked vault.
    pub fn with_master_key(master_key: MasterKey) -> Self {
        let store = Self::new();
        store.set_master_key(Some(master_key));
        store
    }

    /// Locks (`None`) or unlocks the vault.
    pub fn set_master_key(&self, master_key: Option<MasterKey>) {
        self.write_store().master_key = master_key;
    }

    pub fn read_store(&self) -> RwLockReadGuard<'_, InnerMemoryStore> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_store(&self) -> RwLockWriteGuard<'_, InnerMemoryStore> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContactStore for MemoryStore {
    type Error = Infallible;

    async fn save_contact(&self, contact: Contact) -> Result<(), Self::Error> {
        self.write_store().contacts.insert(contact.id, contact);
        Ok(())
    }

    async fn get_contact(&self, id: &ContactId) -> Result<Option<Contact>, Self::Error> {
        Ok(self.read_store().contacts.get(id).cloned())
    }

    async fn contact_by_conversation_id(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Contact>, Self::Error> {
        Ok(self
            .read_store()
            .contacts
            .values()
            .find(|contact| &contact.conversation_id == conversation_id)
            .cloned())
    }

    async fn contacts(&self) -> Result<Vec<Contact>, Self::Error> {
        Ok(self.read_store().contacts.values().cloned().collect())
    }

    async fn remove_contact(&self, id: &ContactId) -> Result<bool, Self::Error> {
        let mut store = self.write_store();
        let removed = store.contacts.remove(id).is_some();
        store.contact_keys.remove(id);
        store.conversations.remove(id);
        store.skipped_keys.remove(id);
        store.handshakes.remove(id);
        store.messages.retain(|_, message| &message.contact_id != id);
        store.queue.retain(|message| &message.contact_id != id);
        Ok(removed)
    }
}

impl ContactKeyStore for MemoryStore {
    type Error = Infallible;

    async fn save_contact_key(
        &self,
        id: &ContactId,
        key: EncContactLocalKey,
    ) -> Result<(), Self::Error> {
        self.write_store().contact_keys.insert(*id, key);
        Ok(())
    }

    async fn get_contact_key(
        &self,
        id: &ContactId,
    ) -> Result<Option<EncContactLocalKey>, Self::Error> {
        Ok(self.read_store().contact_keys.get(id).cloned())
    }
}

impl MasterKeyProvider for MemoryStore {
    type Error = Infallible;

    async fn master_key(&self) -> Result<Option<MasterKey>, Self::Error> {
        Ok(self.read_store().master_key.clone())
    }
}

impl RatchetStore for MemoryStore {
    type Error = Infallible;

    async fn get_conversation(
        &self,
        id: &ContactId,
    ) -> Result<Option<EncConversation>, Self::Error> {
        Ok(self.read_store().conversations.get(id).cloned())
    }

    async fn commit_ratchet(
        &self,
        id: &ContactId,
        write: RatchetWrite,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        if let Some(contact) = write.contact {
            store.contacts.insert(*id, contact);
        }
        if let Some(key) = write.contact_key {
            store.contact_keys.insert(*id, key);
        }
        if let Some(handshake) = write.handshake {
            store.handshakes.insert(*id, handshake);
        }
        store.conversations.insert(*id, write.conversation);
        if !write.skipped_keys.is_empty() {
            store
                .skipped_keys
                .entry(*id)
                .or_default()
                .extend(write.skipped_keys);
        }
        Ok(())
    }

    async fn take_skipped_key(
        &self,
        id: &ContactId,
        key_id: &MessageKeyId,
    ) -> Result<Option<EncMessageKey>, Self::Error> {
        Ok(self
            .write_store()
            .skipped_keys
            .get_mut(id)
            .and_then(|keys| keys.remove(key_id)))
    }

    async fn reset_conversation(
        &self,
        contact: Contact,
        conversation: EncConversation,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        let id = contact.id;
        store.contacts.insert(id, contact);
        store.conversations.insert(id, conversation);
        store.skipped_keys.remove(&id);
        store.handshakes.remove(&id);
        Ok(())
    }
}

impl HandshakeStore for MemoryStore {
    type Error = Infallible;

    async fn save_handshake(
        &self,
        id: &ContactId,
        handshake: EncHandshakeData,
    ) -> Result<(), Self::Error> {
        self.write_store().handshakes.insert(*id, handshake);
        Ok(())
    }

    async fn get_handshake(
        &self,
        id: &ContactId,
    ) -> Result<Option<EncHandshakeData>, Self::Error> {
        Ok(self.read_store().handshakes.get(id).cloned())
    }

    async fn delete_handshake(&self, id: &ContactId) -> Result<bool, Self::Error> {
        Ok(self.write_store().handshakes.remove(id).is_some())
    }
}

impl QueueKeyStore for MemoryStore {
    type Error = Infallible;

    async fn get_queue_key(&self) -> Result<Option<QueueKey>, Self::Error> {
        Ok(self.read_store().queue_key.clone())
    }

    async fn insert_queue_key_if_absent(&self, key: QueueKey) -> Result<QueueKey, Self::Error> {
        Ok(self.write_store().queue_key.get_or_insert(key).clone())
    }
}

impl MessageStore for MemoryStore {
    type Error = Infallible;

    async fn save_message(&self, message: SafeMessage) -> Result<(), Self::Error> {
        self.write_store().messages.insert(message.id, message);
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<SafeMessage>, Self::Error> {
        Ok(self.read_store().messages.get(id).cloned())
    }

    async fn mark_read(&self, id: &MessageId) -> Result<bool, Self::Error> {
        match self.write_store().messages.get_mut(id) {
            Some(message) => {
                message.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn enqueue(&self, message: QueuedMessage) -> Result<(), Self::Error> {
        self.write_store().queue.push(message);
        Ok(())
    }

    async fn queued_messages(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<QueuedMessage>, Self::Error> {
        Ok(self
            .read_store()
            .queue
            .iter()
            .filter(|message| &message.contact_id == contact_id)
            .cloned()
            .collect())
    }

    async fn remove_queued(&self, id: &MessageId) -> Result<bool, Self::Error> {
        let mut store = self.write_store();
        let len = store.queue.len();
        store.queue.retain(|message| &message.id != id);
        Ok(store.queue.len() != len)
    }
}

impl MessageOrderRepository for MemoryStore {
    type Error = Infallible;

    async fn most_recent(
        &self,
        contact_id: &ContactId,
        excluded: &[MessageId],
    ) -> Result<Option<MessageOrder>, Self::Error> {
        Ok(self.read_store().ordered(contact_id, excluded).into_iter().next())
    }

    async fn least_recent(
        &self,
        contact_id: &ContactId,
        excluded: &[MessageId],
    ) -> Result<Option<MessageOrder>, Self::Error> {
        Ok(self.read_store().ordered(contact_id, excluded).pop())
    }

    async fn count(
        &self,
        contact_id: &ContactId,
        excluded: &[MessageId],
    ) -> Result<usize, Self::Error> {
        Ok(self.read_store().ordered(contact_id, excluded).len())
    }

    async fn at(
        &self,
        contact_id: &ContactId,
        position: usize,
        excluded: &[MessageId],
    ) -> Result<Option<MessageOrder>, Self::Error> {
        Ok(self
            .read_store()
            .ordered(contact_id, excluded)
            .into_iter()
            .nth(position))
    }
}

#[cfg(test)]
mod tests {
    use bubbles_core::codec::MessageCodec;
    use bubbles_core::contact::{Contact, MessageDirection, SafeMessage, SharingMode};
    use bubbles_core::conversation::Conversation;
    use bubbles_core::crypto::Rng;
    use bubbles_core::crypto::x25519::KeyPair;
    use bubbles_core::handshake::HandshakeData;
    use bubbles_core::ids::{ContactId, ConversationId, MessageId, Timestamp, VaultId};
    use bubbles_core::key_wrap::{wrap, wrap_record};
    use bubbles_core::keys::{ContactLocalKey, MasterKey, MessageKey, QueueKey};
    use bubbles_core::ratchet::MessageKeyId;

    use crate::traits::{
        ContactKeyStore, ContactStore, HandshakeStore, MessageOrderRepository, MessageStore,
        QueueKeyStore, RatchetStore, RatchetWrite,
    };

    use super::MemoryStore;

    fn new_contact(rng: &Rng, key: &ContactLocalKey) -> Contact {
        Contact {
            id: ContactId::random(rng).unwrap(),
            vault_id: VaultId::random(rng).unwrap(),
            enc_name: wrap(&"Bob".to_string(), key, rng).unwrap(),
            enc_shared_key: None,
            conversation_id: ConversationId::random(rng).unwrap(),
            enc_sharing_mode: wrap(&SharingMode::Deeplink, key, rng).unwrap(),
            updated_at: Timestamp::now(),
            consulted_at: None,
            enc_reset_marker: None,
        }
    }

    fn message(
        rng: &Rng,
        key: &ContactLocalKey,
        contact_id: ContactId,
        order: f64,
    ) -> SafeMessage {
        SafeMessage {
            id: MessageId::random(rng).unwrap(),
            contact_id,
            fields: MessageCodec::encrypt("Hi", Timestamp::now(), None, None, key, rng).unwrap(),
            direction: MessageDirection::Received,
            is_read: false,
            order,
        }
    }

    #[tokio::test]
    async fn skipped_keys_are_taken_once() {
        let rng = Rng::from_seed([1; 32]);
        let key = ContactLocalKey::generate(&rng).unwrap();
        let store = MemoryStore::new();
        let contact = new_contact(&rng, &key);

        let conversation = Conversation::new(contact.id, KeyPair::generate(&rng).unwrap());
        let key_id = MessageKeyId::new(*KeyPair::generate(&rng).unwrap().public_key(), 3);
        let message_key = MessageKey::generate(&rng).unwrap();

        store
            .commit_ratchet(
                &contact.id,
                RatchetWrite::new(wrap_record(&conversation, &key, &rng).unwrap())
                    .skipped_keys(vec![(key_id, wrap(&message_key, &key, &rng).unwrap())]),
            )
            .await
            .unwrap();

        assert!(store.get_conversation(&contact.id).await.unwrap().is_some());
        assert!(store.take_skipped_key(&contact.id, &key_id).await.unwrap().is_some());
        assert!(store.take_skipped_key(&contact.id, &key_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_contact_lands_with_its_conversation() {
        let rng = Rng::from_seed([1; 32]);
        let master_key = MasterKey::generate(&rng).unwrap();
        let key = ContactLocalKey::generate(&rng).unwrap();
        let store = MemoryStore::new();
        let contact = new_contact(&rng, &key);

        let conversation = Conversation::new(contact.id, KeyPair::generate(&rng).unwrap());
        let handshake = HandshakeData::generate(contact.conversation_id, &rng).unwrap();
        store
            .commit_ratchet(
                &contact.id,
                RatchetWrite::new(wrap_record(&conversation, &key, &rng).unwrap())
                    .contact(
                        contact.clone(),
                        master_key.wrap_contact_key(&key, &rng).unwrap(),
                    )
                    .handshake(wrap_record(&handshake, &key, &rng).unwrap()),
            )
            .await
            .unwrap();

        assert_eq!(store.get_contact(&contact.id).await.unwrap(), Some(contact.clone()));
        let enc_key = store.get_contact_key(&contact.id).await.unwrap().unwrap();
        assert_eq!(master_key.unwrap_contact_key(&enc_key).unwrap(), key);
        assert!(store.get_conversation(&contact.id).await.unwrap().is_some());
        assert!(store.get_handshake(&contact.id).await.unwrap().is_some());

        // Later steps leave contact and handshake data alone.
        let next = Conversation::new(contact.id, KeyPair::generate(&rng).unwrap());
        store
            .commit_ratchet(
                &contact.id,
                RatchetWrite::new(wrap_record(&next, &key, &rng).unwrap()),
            )
            .await
            .unwrap();
        assert!(store.get_handshake(&contact.id).await.unwrap().is_some());
        assert_eq!(store.contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_purges_keys_and_handshake() {
        let rng = Rng::from_seed([1; 32]);
        let key = ContactLocalKey::generate(&rng).unwrap();
        let store = MemoryStore::new();
        let mut contact = new_contact(&rng, &key);
        store.save_contact(contact.clone()).await.unwrap();

        let conversation = Conversation::new(contact.id, KeyPair::generate(&rng).unwrap());
        let key_id = MessageKeyId::new(*KeyPair::generate(&rng).unwrap().public_key(), 0);
        store
            .commit_ratchet(
                &contact.id,
                RatchetWrite::new(wrap_record(&conversation, &key, &rng).unwrap()).skipped_keys(
                    vec![(
                        key_id,
                        wrap(&MessageKey::generate(&rng).unwrap(), &key, &rng).unwrap(),
                    )],
                ),
            )
            .await
            .unwrap();
        let handshake = HandshakeData::generate(contact.conversation_id, &rng).unwrap();
        store
            .save_handshake(&contact.id, wrap_record(&handshake, &key, &rng).unwrap())
            .await
            .unwrap();

        contact.enc_reset_marker = Some(wrap(&Timestamp::now(), &key, &rng).unwrap());
        let fresh = Conversation::new(contact.id, KeyPair::generate(&rng).unwrap());
        store
            .reset_conversation(contact.clone(), wrap_record(&fresh, &key, &rng).unwrap())
            .await
            .unwrap();

        assert_eq!(store.read_store().skipped_keys_len(&contact.id), 0);
        assert!(store.get_handshake(&contact.id).await.unwrap().is_none());
        let stored = store.get_contact(&contact.id).await.unwrap().unwrap();
        assert!(stored.enc_reset_marker.is_some());
    }

    #[tokio::test]
    async fn remove_contact_cascades() {
        let rng = Rng::from_seed([1; 32]);
        let key = ContactLocalKey::generate(&rng).unwrap();
        let store = MemoryStore::new();
        let contact = new_contact(&rng, &key);
        let other = new_contact(&rng, &key);
        store.save_contact(contact.clone()).await.unwrap();
        store.save_contact(other.clone()).await.unwrap();

        store.save_message(message(&rng, &key, contact.id, 0.0)).await.unwrap();
        store.save_message(message(&rng, &key, other.id, 0.0)).await.unwrap();

        assert!(store.remove_contact(&contact.id).await.unwrap());
        assert!(!store.remove_contact(&contact.id).await.unwrap());
        assert_eq!(store.count(&contact.id, &[]).await.unwrap(), 0);
        assert_eq!(store.count(&other.id, &[]).await.unwrap(), 1);
        assert_eq!(store.contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn queue_key_is_inserted_once() {
        let rng = Rng::from_seed([1; 32]);
        let store = MemoryStore::new();
        assert!(store.get_queue_key().await.unwrap().is_none());

        let first = QueueKey::generate(&rng).unwrap();
        let second = QueueKey::generate(&rng).unwrap();
        assert_eq!(store.insert_queue_key_if_absent(first.clone()).await.unwrap(), first);
        assert_eq!(store.insert_queue_key_if_absent(second).await.unwrap(), first);
    }

    #[tokio::test]
    async fn order_queries() {
        let rng = Rng::from_seed([1; 32]);
        let key = ContactLocalKey::generate(&rng).unwrap();
        let store = MemoryStore::new();
        let contact_id = ContactId::random(&rng).unwrap();

        let messages: Vec<SafeMessage> = [2.0, 0.0, 1.5, 1.0]
            .into_iter()
            .map(|order| message(&rng, &key, contact_id, order))
            .collect();
        for message in &messages {
            store.save_message(message.clone()).await.unwrap();
        }

        let most_recent = store.most_recent(&contact_id, &[]).await.unwrap().unwrap();
        assert_eq!(most_recent.order, 2.0);
        let least_recent = store.least_recent(&contact_id, &[]).await.unwrap().unwrap();
        assert_eq!(least_recent.order, 0.0);
        assert_eq!(store.at(&contact_id, 1, &[]).await.unwrap().unwrap().order, 1.5);
        assert!(store.at(&contact_id, 4, &[]).await.unwrap().is_none());

        let excluded = [messages[0].id];
        assert_eq!(store.count(&contact_id, &excluded).await.unwrap(), 3);
        let most_recent = store.most_recent(&contact_id, &excluded).await.unwrap().unwrap();
        assert_eq!(most_recent.order, 1.5);
    }

    #[tokio::test]
    async fn mark_read() {
        let rng = Rng::from_seed([1; 32]);
        let key = ContactLocalKey::generate(&rng).unwrap();
        let store = MemoryStore::new();
        let message = message(&rng, &key, ContactId::random(&rng).unwrap(), 0.0);
        store.save_message(message.clone()).await.unwrap();

        assert!(store.mark_read(&message.id).await.unwrap());
        assert!(store.get_message(&message.id).await.unwrap().unwrap().is_read);
        assert!(!store.mark_read(&MessageId::random(&rng).unwrap()).await.unwrap());
    }
}
