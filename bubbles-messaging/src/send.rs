// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outgoing messages and the local message history.
use bubbles_core::codec::{EncMessageFields, MessageCodec, PlainMessageData};
use bubbles_core::contact::{MessageDirection, QueuedMessage, SafeMessage};
use bubbles_core::ids::{ContactId, ItemId, MessageId, Timestamp};
use bubbles_core::key_wrap::{unwrap, wrap_record};
use bubbles_core::wire::{EncryptedMessage, Envelope, MessageHeader, SealedPayload};
use bubbles_store::MessageStore;
use tracing::{debug, trace, warn};

use crate::context::{MessagingContext, MessagingStore};
use crate::error::MessagingError;
use crate::order::OrderResult;

impl<S> MessagingContext<S>
where
    S: MessagingStore,
{
    /// Encrypts a message for the contact and returns the envelope to hand over.
    ///
    /// Until the contact's first message arrived the envelope carries our handshake key,
    /// afterwards it is sealed under the shared key. Fails with [`MessagingError::NotReady`]
    /// before the contact replied to our invitation, queue the message in that case.
    pub async fn encrypt_message(
        &self,
        contact_id: &ContactId,
        content: &str,
        sent_at: Timestamp,
        channel: Option<&str>,
        linked_item_id: Option<ItemId>,
    ) -> Result<Vec<u8>, MessagingError> {
        let (header, message_key) = self.next_send_key(contact_id).await?;
        let fields = MessageCodec::encrypt_bound(
            content,
            sent_at,
            channel,
            linked_item_id,
            &message_key,
            &header.to_bytes(),
            &self.rng,
        )?;
        self.envelope(contact_id, header, fields).await
    }

    /// Stores a message for later, when no sending chain exists yet.
    pub async fn queue_message(
        &self,
        contact_id: &ContactId,
        content: &str,
        sent_at: Timestamp,
        channel: Option<&str>,
        linked_item_id: Option<ItemId>,
    ) -> Result<MessageId, MessagingError> {
        let queue_key = self.queue_key().await?;
        let message = QueuedMessage {
            id: MessageId::random(&self.rng)?,
            contact_id: *contact_id,
            fields: MessageCodec::encrypt(
                content,
                sent_at,
                channel,
                linked_item_id,
                &queue_key,
                &self.rng,
            )?,
        };
        let id = message.id;

        self.store
            .enqueue(message)
            .await
            .map_err(MessagingError::store)?;
        debug!(contact = %contact_id, message = %id, "queued message");
        Ok(id)
    }

    /// Encrypts queued messages of the contact, oldest first, and removes them from the queue.
    ///
    /// Returns nothing while the conversation can't send yet.
    pub async fn flush_queued(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<Vec<u8>>, MessagingError> {
        let queued = self
            .store
            .queued_messages(contact_id)
            .await
            .map_err(MessagingError::store)?;
        if queued.is_empty() {
            return Ok(Vec::new());
        }

        let queue_key = self.queue_key().await?;
        let mut envelopes = Vec::with_capacity(queued.len());
        for message in queued {
            let (header, message_key) = match self.next_send_key(contact_id).await {
                Ok(next) => next,
                Err(MessagingError::NotReady) => {
                    trace!(contact = %contact_id, "queue stays, conversation not ready");
                    break;
                }
                Err(err) => return Err(err),
            };
            let fields = MessageCodec::reencrypt(
                &message.fields,
                &queue_key,
                &message_key,
                &header.to_bytes(),
                &self.rng,
            )?;
            envelopes.push(self.envelope(contact_id, header, fields).await?);
            self.store
                .remove_queued(&message.id)
                .await
                .map_err(MessagingError::store)?;
        }

        debug!(contact = %contact_id, count = envelopes.len(), "flushed queued messages");
        Ok(envelopes)
    }

    /// Stores a message in the contact's history, at the position given by its sent-at.
    pub async fn save_message(
        &self,
        contact_id: &ContactId,
        content: &str,
        sent_at: Timestamp,
        channel: Option<&str>,
        linked_item_id: Option<ItemId>,
        direction: MessageDirection,
    ) -> Result<MessageId, MessagingError> {
        let key = self.contact_key(contact_id).await?;
        let fields = MessageCodec::encrypt(
            content,
            sent_at,
            channel,
            linked_item_id,
            &key,
            &self.rng,
        )?;
        self.store_message(contact_id, fields, Some(sent_at), direction)
            .await
    }

    /// Decrypts a message of the history. Fields which can't be unwrapped are reported
    /// individually.
    pub async fn decrypt_safe_message(
        &self,
        message_id: &MessageId,
    ) -> Result<PlainMessageData, MessagingError> {
        let message = self
            .store
            .get_message(message_id)
            .await
            .map_err(MessagingError::store)?
            .ok_or(MessagingError::MessageNotFound(*message_id))?;
        let key = self.contact_key(&message.contact_id).await?;

        let data = MessageCodec::decrypt(&message.fields, &key);
        if data.has_corrupted_data {
            warn!(message = %message_id, "message has corrupted fields");
        }
        Ok(data)
    }

    /// Returns `false` if the message does not exist.
    pub async fn mark_read(&self, message_id: &MessageId) -> Result<bool, MessagingError> {
        self.store
            .mark_read(message_id)
            .await
            .map_err(MessagingError::store)
    }

    /// Saves fields wrapped under the contact local key. Messages without a readable sent-at
    /// go after the most recent one.
    pub(crate) async fn store_message(
        &self,
        contact_id: &ContactId,
        fields: EncMessageFields,
        sent_at: Option<Timestamp>,
        direction: MessageDirection,
    ) -> Result<MessageId, MessagingError> {
        // Unreadable sent-at sorts as the most recent message.
        let sent_at = sent_at.unwrap_or(Timestamp::from_millis(u64::MAX));
        let order = match self.message_order(contact_id, sent_at).await? {
            OrderResult::Duplicated {
                candidate,
                duplicated,
            } => {
                trace!(contact = %contact_id, duplicated, candidate, "duplicated sent-at");
                candidate
            }
            OrderResult::Found(order) => order,
        };

        let message = SafeMessage {
            id: MessageId::random(&self.rng)?,
            contact_id: *contact_id,
            fields,
            direction,
            is_read: direction == MessageDirection::Sent,
            order,
        };
        let id = message.id;
        MessageStore::save_message(&self.store, message)
            .await
            .map_err(MessagingError::store)?;
        Ok(id)
    }

    /// Puts an encrypted message into the envelope matching the handshake phase.
    async fn envelope(
        &self,
        contact_id: &ContactId,
        header: MessageHeader,
        fields: EncMessageFields,
    ) -> Result<Vec<u8>, MessagingError> {
        let contact = self.contact(contact_id).await?;
        let key = self.contact_key(contact_id).await?;
        let shared_key = Self::shared_key(&contact, &key)?
            .ok_or(MessagingError::MissingSharedKey(*contact_id))?;
        let message = EncryptedMessage {
            header,
            body: fields,
        }
        .to_bytes()?;

        let envelope = match self.handshake(contact_id, &key).await? {
            Some(handshake) => Envelope::Handshake {
                conversation_id: contact.conversation_id,
                handshake_public_key: *handshake.public_key(),
                recipient_id: *contact_id,
                message,
            },
            None => {
                let reset_at = contact
                    .enc_reset_marker
                    .as_ref()
                    .map(|marker| unwrap(marker, &key))
                    .transpose()?;
                let payload = SealedPayload::Message {
                    recipient_id: *contact_id,
                    message,
                    reset_at,
                };
                Envelope::Sealed(wrap_record(&payload, &shared_key, &self.rng)?)
            }
        };
        Ok(envelope.to_bytes()?)
    }
}
