// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact lifecycle: invitations, the handshake and removal.
use bubbles_core::codec::ACCEPTED_INVITATION_SENTINEL;
use bubbles_core::contact::{Contact, SharingMode};
use bubbles_core::conversation::Conversation;
use bubbles_core::handshake::HandshakeData;
use bubbles_core::ids::{ContactId, ConversationId, Timestamp, VaultId};
use bubbles_core::key_wrap::{unwrap, wrap, wrap_record};
use bubbles_core::keys::{ContactLocalKey, EncContactLocalKey, MasterKey, QueueKey};
use bubbles_core::ratchet::DoubleRatchet;
use bubbles_core::state::{ConversationState, resolve_conversation_state};
use bubbles_core::wire::{Envelope, Invitation};
use bubbles_store::{ContactStore, MasterKeyProvider, QueueKeyStore, RatchetStore, RatchetWrite};
use tracing::debug;

use crate::context::{MessagingContext, MessagingStore};
use crate::error::MessagingError;

impl<S> MessagingContext<S>
where
    S: MessagingStore,
{
    /// Creates a contact and the invitation to hand to it, usually shown as a QR code.
    ///
    /// Nothing can be sent until the contact replied, see [`Self::queue_message`].
    pub async fn create_invitation(
        &self,
        vault_id: VaultId,
        name: &str,
        sharing_mode: SharingMode,
    ) -> Result<(ContactId, Vec<u8>), MessagingError> {
        let conversation_id = ConversationId::random(&self.rng)?;
        let (contact, key, enc_key) = self
            .new_contact(vault_id, name, sharing_mode, conversation_id)
            .await?;
        let contact_id = contact.id;

        let (write, ratchet_public_key, handshake) = self.initiate_write(&contact, &key)?;
        self.store
            .commit_ratchet(&contact_id, write.contact(contact, enc_key))
            .await
            .map_err(MessagingError::store)?;

        let invitation = Envelope::Invitation(Invitation {
            conversation_id,
            ratchet_public_key,
            handshake_public_key: *handshake.public_key(),
        });

        debug!(contact = %contact_id, conversation = %conversation_id, "created invitation");
        Ok((contact_id, invitation.to_bytes()?))
    }

    /// Creates a contact from a received invitation and answers it.
    ///
    /// The shared key is known right away, the conversation can send immediately. The returned
    /// envelope carries the accepted-invitation message and completes the handshake on the
    /// inviting side.
    pub async fn accept_invitation(
        &self,
        vault_id: VaultId,
        name: &str,
        sharing_mode: SharingMode,
        invitation: &Invitation,
    ) -> Result<(ContactId, Vec<u8>), MessagingError> {
        let (mut contact, key, enc_key) = self
            .new_contact(vault_id, name, sharing_mode, invitation.conversation_id)
            .await?;
        let contact_id = contact.id;

        let handshake = HandshakeData::generate(invitation.conversation_id, &self.rng)?;
        let shared_key = handshake.derive_shared_key(&invitation.handshake_public_key)?;
        let conversation = DoubleRatchet::accept(
            contact_id,
            &invitation.conversation_id,
            &invitation.ratchet_public_key,
            &self.rng,
        )?;
        contact.enc_shared_key = Some(wrap(&shared_key, &key, &self.rng)?);

        let write = RatchetWrite::new(wrap_record(&conversation, &key, &self.rng)?)
            .contact(contact, enc_key)
            .handshake(wrap_record(&handshake, &key, &self.rng)?);
        self.store
            .commit_ratchet(&contact_id, write)
            .await
            .map_err(MessagingError::store)?;

        let reply = self
            .encrypt_message(
                &contact_id,
                ACCEPTED_INVITATION_SENTINEL,
                Timestamp::now(),
                None,
                None,
            )
            .await?;

        debug!(
            contact = %contact_id,
            conversation = %invitation.conversation_id,
            "accepted invitation"
        );
        Ok((contact_id, reply))
    }

    /// Removes a contact together with its keys, conversation and messages.
    ///
    /// Returns `false` if there was no such contact.
    pub async fn remove_contact(&self, contact_id: &ContactId) -> Result<bool, MessagingError> {
        let removed = {
            let _guard = self.locks.lock(contact_id).await;
            ContactStore::remove_contact(&self.store, contact_id)
                .await
                .map_err(MessagingError::store)?
        };
        self.locks.remove(contact_id);

        if removed {
            debug!(contact = %contact_id, "removed contact");
        }
        Ok(removed)
    }

    pub async fn contact_name(&self, contact_id: &ContactId) -> Result<String, MessagingError> {
        let contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;
        Ok(unwrap(&contact.enc_name, &key)?)
    }

    pub async fn rename_contact(
        &self,
        contact_id: &ContactId,
        name: &str,
    ) -> Result<(), MessagingError> {
        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;

        contact.enc_name = wrap(&name.to_string(), &key, &self.rng)?;
        contact.updated_at = Timestamp::now();
        self.save_contact(contact).await
    }

    pub async fn sharing_mode(
        &self,
        contact_id: &ContactId,
    ) -> Result<SharingMode, MessagingError> {
        let contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;
        Ok(unwrap(&contact.enc_sharing_mode, &key)?)
    }

    pub async fn set_sharing_mode(
        &self,
        contact_id: &ContactId,
        sharing_mode: SharingMode,
    ) -> Result<(), MessagingError> {
        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;

        contact.enc_sharing_mode = wrap(&sharing_mode, &key, &self.rng)?;
        contact.updated_at = Timestamp::now();
        self.save_contact(contact).await
    }

    /// Negotiation phase of the conversation with a contact.
    ///
    /// Stored state which can't be unwrapped, as well as a missing conversation, resolve to
    /// [`ConversationState::Indecipherable`]. Missing contacts and a locked vault are errors.
    pub async fn resolve_conversation_state(
        &self,
        contact_id: &ContactId,
    ) -> Result<ConversationState, MessagingError> {
        let contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;

        let stored = async {
            let conversation: Option<Conversation> = self.conversation(contact_id, &key).await?;
            let handshake = self.handshake(contact_id, &key).await?;
            Ok::<_, MessagingError>((conversation, handshake))
        };
        let (conversation, handshake) = match stored.await {
            Ok(stored) => stored,
            Err(MessagingError::DecryptionFailure(err)) => {
                debug!(contact = %contact_id, %err, "conversation state is unreadable");
                return Ok(ConversationState::Indecipherable);
            }
            Err(err) => return Err(err),
        };

        Ok(ConversationState::from_resolution(
            resolve_conversation_state(conversation.as_ref(), handshake.as_ref(), Some(&contact)),
        ))
    }

    /// The process-wide key protecting queued messages, created on first use.
    pub async fn queue_key(&self) -> Result<QueueKey, MessagingError> {
        self.queue_key
            .get_or_try_init(|| async {
                if let Some(key) = self
                    .store
                    .get_queue_key()
                    .await
                    .map_err(MessagingError::store)?
                {
                    return Ok(key);
                }
                let key = QueueKey::generate(&self.rng)?;
                let key = self
                    .store
                    .insert_queue_key_if_absent(key)
                    .await
                    .map_err(MessagingError::store)?;
                debug!("created queue key");
                Ok(key)
            })
            .await
            .cloned()
    }

    /// A contact with a fresh local key, not stored yet. Returns the key in the clear and
    /// wrapped under the master key.
    async fn new_contact(
        &self,
        vault_id: VaultId,
        name: &str,
        sharing_mode: SharingMode,
        conversation_id: ConversationId,
    ) -> Result<(Contact, ContactLocalKey, EncContactLocalKey), MessagingError> {
        let master_key = self.master_key().await?;
        let contact_id = ContactId::random(&self.rng)?;
        let key = ContactLocalKey::generate(&self.rng)?;

        let contact = Contact {
            id: contact_id,
            vault_id,
            enc_name: wrap(&name.to_string(), &key, &self.rng)?,
            enc_shared_key: None,
            conversation_id,
            enc_sharing_mode: wrap(&sharing_mode, &key, &self.rng)?,
            updated_at: Timestamp::now(),
            consulted_at: None,
            enc_reset_marker: None,
        };

        let enc_key = master_key.wrap_contact_key(&key, &self.rng)?;
        Ok((contact, key, enc_key))
    }

    async fn master_key(&self) -> Result<MasterKey, MessagingError> {
        self.store
            .master_key()
            .await
            .map_err(MessagingError::store)?
            .ok_or(MessagingError::VaultLocked)
    }
}
