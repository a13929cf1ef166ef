// SPDX-License-Identifier: MIT OR Apache-2.0

use bubbles_core::contact::Contact;
use bubbles_core::conversation::Conversation;
use bubbles_core::crypto::Rng;
use bubbles_core::handshake::HandshakeData;
use bubbles_core::ids::ContactId;
use bubbles_core::key_wrap::{unwrap, unwrap_record};
use bubbles_core::keys::{ContactLocalKey, QueueKey, SharedKey};
use bubbles_store::{
    ContactKeyStore, ContactStore, HandshakeStore, MasterKeyProvider, MessageOrderRepository,
    MessageStore, QueueKeyStore, RatchetStore,
};
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::error::MessagingError;
use crate::locks::ContactLocks;

/// Every store the messaging flows need.
pub trait MessagingStore:
    ContactStore
    + ContactKeyStore
    + MasterKeyProvider
    + RatchetStore
    + HandshakeStore
    + QueueKeyStore
    + MessageStore
    + MessageOrderRepository
{
}

impl<T> MessagingStore for T where
    T: ContactStore
        + ContactKeyStore
        + MasterKeyProvider
        + RatchetStore
        + HandshakeStore
        + QueueKeyStore
        + MessageStore
        + MessageOrderRepository
{
}

/// Entry point to all conversation operations of one vault owner.
///
/// Bundles the store, randomness, configuration and the per-contact locks. Operations are
/// implemented across the modules of this crate: the ratchet engine, contact lifecycle,
/// sending, receiving and message ordering.
pub struct MessagingContext<S> {
    pub(crate) store: S,
    pub(crate) rng: Rng,
    pub(crate) config: Config,
    pub(crate) locks: ContactLocks,
    pub(crate) queue_key: OnceCell<QueueKey>,
}

impl<S> MessagingContext<S>
where
    S: MessagingStore,
{
    pub fn new(store: S, rng: Rng, config: Config) -> Self {
        Self {
            store,
            rng,
            config,
            locks: ContactLocks::default(),
            queue_key: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) async fn contact(&self, id: &ContactId) -> Result<Contact, MessagingError> {
        ContactStore::get_contact(&self.store, id)
            .await
            .map_err(MessagingError::store)?
            .ok_or(MessagingError::ContactNotFound(*id))
    }

    /// Unwraps the local key of a contact with the vault master key.
    pub(crate) async fn contact_key(
        &self,
        id: &ContactId,
    ) -> Result<ContactLocalKey, MessagingError> {
        let master_key = self
            .store
            .master_key()
            .await
            .map_err(MessagingError::store)?
            .ok_or(MessagingError::VaultLocked)?;
        let enc_key = self
            .store
            .get_contact_key(id)
            .await
            .map_err(MessagingError::store)?
            .ok_or(MessagingError::MissingContactKey(*id))?;
        Ok(master_key.unwrap_contact_key(&enc_key)?)
    }

    pub(crate) async fn conversation(
        &self,
        id: &ContactId,
        key: &ContactLocalKey,
    ) -> Result<Option<Conversation>, MessagingError> {
        let Some(enc) = self
            .store
            .get_conversation(id)
            .await
            .map_err(MessagingError::store)?
        else {
            return Ok(None);
        };
        Ok(Some(unwrap_record(&enc, key)?))
    }

    pub(crate) async fn handshake(
        &self,
        id: &ContactId,
        key: &ContactLocalKey,
    ) -> Result<Option<HandshakeData>, MessagingError> {
        let Some(enc) = self
            .store
            .get_handshake(id)
            .await
            .map_err(MessagingError::store)?
        else {
            return Ok(None);
        };
        Ok(Some(unwrap_record(&enc, key)?))
    }

    pub(crate) fn shared_key(
        contact: &Contact,
        key: &ContactLocalKey,
    ) -> Result<Option<SharedKey>, MessagingError> {
        contact
            .enc_shared_key
            .as_ref()
            .map(|enc| unwrap(enc, key))
            .transpose()
            .map_err(MessagingError::from)
    }
}
