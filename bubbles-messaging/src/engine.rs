// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stateful double ratchet operations.
//!
//! Every operation loads the conversation of one contact, runs a pure transition from
//! [`bubbles_core::ratchet`] and persists the outcome in a single store write, all while holding
//! the contact's lock. Nothing is written if a step fails half way.
use bubbles_core::contact::Contact;
use bubbles_core::conversation::Conversation;
use bubbles_core::crypto::x25519::PublicKey;
use bubbles_core::handshake::HandshakeData;
use bubbles_core::ids::{ContactId, Timestamp};
use bubbles_core::key_wrap::{unwrap, wrap, wrap_record};
use bubbles_core::keys::{ContactLocalKey, EncMessageKey, MessageKey};
use bubbles_core::ratchet::{DoubleRatchet, MessageKeyId};
use bubbles_core::wire::{Envelope, MessageHeader, SealedPayload};
use bubbles_store::{ContactStore, RatchetStore, RatchetWrite};
use tracing::{debug, trace};

use crate::context::{MessagingContext, MessagingStore};
use crate::error::MessagingError;

impl<S> MessagingContext<S>
where
    S: MessagingStore,
{
    /// Starts a conversation as the inviting side.
    ///
    /// Stores a conversation holding only a fresh key pair and handshake data for the contact's
    /// shared conversation id. Returns the ratchet public key to put into the invitation.
    pub async fn initiate(
        &self,
        contact_id: &ContactId,
    ) -> Result<(PublicKey, HandshakeData), MessagingError> {
        let _guard = self.locks.lock(contact_id).await;
        let contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;

        let (write, public_key, handshake) = self.initiate_write(&contact, &key)?;
        self.store
            .commit_ratchet(contact_id, write)
            .await
            .map_err(MessagingError::store)?;

        debug!(contact = %contact_id, "initiated conversation");
        Ok((public_key, handshake))
    }

    /// Fresh conversation and handshake data for a contact, as one write.
    pub(crate) fn initiate_write(
        &self,
        contact: &Contact,
        key: &ContactLocalKey,
    ) -> Result<(RatchetWrite, PublicKey, HandshakeData), MessagingError> {
        let conversation = DoubleRatchet::initiate(contact.id, &self.rng)?;
        let handshake = HandshakeData::generate(contact.conversation_id, &self.rng)?;
        let write = RatchetWrite::new(wrap_record(&conversation, key, &self.rng)?)
            .handshake(wrap_record(&handshake, key, &self.rng)?);
        Ok((write, *conversation.public_key(), handshake))
    }

    /// Derives the key for the next outgoing message.
    ///
    /// Fails with [`MessagingError::NotReady`] while the contact hasn't replied yet.
    pub async fn next_send_key(
        &self,
        contact_id: &ContactId,
    ) -> Result<(MessageHeader, MessageKey), MessagingError> {
        let _guard = self.locks.lock(contact_id).await;
        let key = self.contact_key(contact_id).await?;
        let conversation = self
            .conversation(contact_id, &key)
            .await?
            .ok_or(MessagingError::ConversationNotFound(*contact_id))?;

        let (conversation, header, message_key) = DoubleRatchet::next_send_key(conversation)?;
        self.commit(contact_id, &conversation, Vec::new(), &key)
            .await?;

        trace!(
            contact = %contact_id,
            message_number = header.message_number,
            sequence_number = header.sequence_number,
            "derived send key"
        );
        Ok((header, message_key))
    }

    /// Resolves the key of an incoming message.
    ///
    /// Cached keys of skipped messages are used (and removed) first. Otherwise the receiving
    /// chain moves forward, stepping the DH ratchet for a new public key.
    pub async fn resolve_receive_key(
        &self,
        contact_id: &ContactId,
        header: &MessageHeader,
    ) -> Result<MessageKey, MessagingError> {
        let _guard = self.locks.lock(contact_id).await;
        let contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;

        let key_id = MessageKeyId::from(header);
        if let Some(enc) = self
            .store
            .take_skipped_key(contact_id, &key_id)
            .await
            .map_err(MessagingError::store)?
        {
            trace!(
                contact = %contact_id,
                message_number = header.message_number,
                "used cached key"
            );
            return Ok(unwrap(&enc, &key)?);
        }

        let conversation = self
            .conversation(contact_id, &key)
            .await?
            .ok_or(MessagingError::ConversationNotFound(*contact_id))?;
        let received = DoubleRatchet::resolve_receive_key(
            conversation,
            header,
            &contact.conversation_id,
            self.config.max_skipped_message_keys,
            &self.rng,
        )?;

        if received.dh_step {
            debug!(contact = %contact_id, "dh ratchet step");
        }
        if !received.skipped.is_empty() {
            debug!(
                contact = %contact_id,
                count = received.skipped.len(),
                "caching skipped message keys"
            );
        }

        let skipped = received
            .skipped
            .iter()
            .map(|(key_id, message_key)| Ok((*key_id, wrap(message_key, &key, &self.rng)?)))
            .collect::<Result<Vec<_>, MessagingError>>()?;
        self.commit(contact_id, &received.conversation, skipped, &key)
            .await?;

        Ok(received.message_key)
    }

    /// Restarts the conversation with a contact.
    ///
    /// Replaces the conversation by one holding only a fresh key pair, drops skipped keys and
    /// handshake data and marks the contact as reset. Returns the envelope inviting the contact
    /// to continue from the new public key.
    pub async fn reset(&self, contact_id: &ContactId) -> Result<Vec<u8>, MessagingError> {
        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;
        let shared_key = Self::shared_key(&contact, &key)?
            .ok_or(MessagingError::MissingSharedKey(*contact_id))?;

        let conversation = DoubleRatchet::initiate(*contact_id, &self.rng)?;
        let reset_at = Timestamp::now();
        contact.enc_reset_marker = Some(wrap(&reset_at, &key, &self.rng)?);
        contact.updated_at = reset_at;

        let payload = SealedPayload::ResetInvitation {
            recipient_id: *contact_id,
            ratchet_public_key: *conversation.public_key(),
            reset_at,
        };
        let envelope = Envelope::Sealed(wrap_record(&payload, &shared_key, &self.rng)?);

        self.store
            .reset_conversation(contact, wrap_record(&conversation, &key, &self.rng)?)
            .await
            .map_err(MessagingError::store)?;

        debug!(contact = %contact_id, %reset_at, "reset conversation");
        Ok(envelope.to_bytes()?)
    }

    /// Accepts a reset invitation: the conversation restarts from the contact's new key and the
    /// contact carries the same reset marker as on the other side.
    pub(crate) async fn accept_reset(
        &self,
        contact_id: &ContactId,
        their_public_key: &PublicKey,
        reset_at: Timestamp,
        key: &ContactLocalKey,
    ) -> Result<(), MessagingError> {
        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.contact(contact_id).await?;
        let conversation = DoubleRatchet::accept(
            *contact_id,
            &contact.conversation_id,
            their_public_key,
            &self.rng,
        )?;

        contact.enc_reset_marker = Some(wrap(&reset_at, key, &self.rng)?);
        contact.updated_at = Timestamp::now();
        self.store
            .reset_conversation(contact, wrap_record(&conversation, key, &self.rng)?)
            .await
            .map_err(MessagingError::store)?;

        debug!(contact = %contact_id, %reset_at, "accepted conversation reset");
        Ok(())
    }

    pub(crate) async fn commit(
        &self,
        contact_id: &ContactId,
        conversation: &Conversation,
        skipped_keys: Vec<(MessageKeyId, EncMessageKey)>,
        key: &ContactLocalKey,
    ) -> Result<(), MessagingError> {
        let write = RatchetWrite::new(wrap_record(conversation, key, &self.rng)?)
            .skipped_keys(skipped_keys);
        self.store
            .commit_ratchet(contact_id, write)
            .await
            .map_err(MessagingError::store)
    }

    /// Stores the contact again, e.g. after setting its shared key.
    pub(crate) async fn save_contact(
        &self,
        contact: Contact,
    ) -> Result<(), MessagingError> {
        ContactStore::save_contact(&self.store, contact)
            .await
            .map_err(MessagingError::store)
    }
}
