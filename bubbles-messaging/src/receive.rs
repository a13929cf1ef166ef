// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incoming envelopes.
//!
//! Finds the contact an envelope belongs to, completes the handshake, follows resets and
//! decrypts messages into the contact's history.
use bubbles_core::codec::{EncMessageFields, MessageCodec, MessageContent, PlainMessageData};
use bubbles_core::contact::{Contact, MessageDirection};
use bubbles_core::crypto::Rng;
use bubbles_core::crypto::x25519::PublicKey;
use bubbles_core::ids::{ContactId, ConversationId, MessageId, Timestamp};
use bubbles_core::key_wrap::{
    KeyWrapError, Wrappable, Wrapped, unwrap, unwrap_bound, unwrap_record, wrap,
};
use bubbles_core::keys::{ContactLocalKey, MessageKey};
use bubbles_core::wire::{EncryptedMessage, Envelope, Invitation, SealedPayload};
use bubbles_store::{ContactStore, HandshakeStore};
use tracing::{debug, trace, warn};

use crate::context::{MessagingContext, MessagingStore};
use crate::error::MessagingError;

/// Outcome of [`MessagingContext::receive`].
#[derive(Debug)]
pub enum IncomingMessage {
    /// Someone invites us. Accept with [`MessagingContext::accept_invitation`].
    Invitation(Invitation),

    /// A message, stored in the contact's history.
    NewMessage {
        contact_id: ContactId,
        message_id: MessageId,
        data: PlainMessageData,
    },

    /// The contact accepted our invitation, messages can be sent from now on.
    InvitationAccepted { contact_id: ContactId },

    /// The message was received before.
    AlreadyDecrypted { contact_id: ContactId },

    /// We sent this envelope ourselves.
    OwnMessage,

    /// The message belongs to a conversation which was reset since.
    OutdatedConversation { contact_id: ContactId },

    /// The contact restarted the conversation, we follow.
    Reset { contact_id: ContactId },
}

impl<S> MessagingContext<S>
where
    S: MessagingStore,
{
    pub async fn receive(&self, bytes: &[u8]) -> Result<IncomingMessage, MessagingError> {
        match Envelope::from_bytes(bytes)? {
            Envelope::Invitation(invitation) => Ok(IncomingMessage::Invitation(invitation)),
            Envelope::Handshake {
                conversation_id,
                handshake_public_key,
                recipient_id,
                message,
            } => {
                self.receive_handshake(
                    &conversation_id,
                    &handshake_public_key,
                    &recipient_id,
                    &message,
                )
                .await
            }
            Envelope::Sealed(sealed) => self.receive_sealed(&sealed).await,
        }
    }

    async fn receive_handshake(
        &self,
        conversation_id: &ConversationId,
        handshake_public_key: &PublicKey,
        recipient_id: &ContactId,
        message: &[u8],
    ) -> Result<IncomingMessage, MessagingError> {
        if ContactStore::get_contact(&self.store, recipient_id)
            .await
            .map_err(MessagingError::store)?
            .is_some()
        {
            return Ok(IncomingMessage::OwnMessage);
        }

        let mut contact = self
            .store
            .contact_by_conversation_id(conversation_id)
            .await
            .map_err(MessagingError::store)?
            .ok_or(MessagingError::NoMatchingContact)?;
        let contact_id = contact.id;
        let key = self.contact_key(&contact_id).await?;

        // The first envelope of the contact completes our side of the handshake.
        let shared_key = match contact.enc_shared_key {
            Some(_) => None,
            None => {
                let handshake = self
                    .handshake(&contact_id, &key)
                    .await?
                    .ok_or(MessagingError::MissingHandshake(contact_id))?;
                Some(handshake.derive_shared_key(handshake_public_key)?)
            }
        };

        let received = self.decrypt_incoming(&contact_id, message, &key).await?;

        let completed = match shared_key {
            Some(shared_key) => {
                contact.enc_shared_key = Some(wrap(&shared_key, &key, &self.rng)?);
                contact.updated_at = Timestamp::now();
                self.save_contact(contact).await?;
                self.store
                    .delete_handshake(&contact_id)
                    .await
                    .map_err(MessagingError::store)?;
                debug!(contact = %contact_id, "handshake completed");
                true
            }
            None => false,
        };

        let Some((data, fields)) = received else {
            return Ok(IncomingMessage::AlreadyDecrypted { contact_id });
        };
        if matches!(data.content, MessageContent::AcceptedInvitation) {
            return Ok(if completed {
                IncomingMessage::InvitationAccepted { contact_id }
            } else {
                IncomingMessage::AlreadyDecrypted { contact_id }
            });
        }
        self.new_message(contact_id, data, fields).await
    }

    async fn receive_sealed(
        &self,
        sealed: &Wrapped<SealedPayload>,
    ) -> Result<IncomingMessage, MessagingError> {
        let (contact, key, payload) = self.match_contact(sealed).await?;
        let contact_id = contact.id;

        if payload.recipient_id() == contact_id {
            return Ok(IncomingMessage::OwnMessage);
        }

        let reset_marker = contact
            .enc_reset_marker
            .as_ref()
            .map(|marker| unwrap(marker, &key))
            .transpose()?;

        match payload {
            SealedPayload::ResetInvitation {
                ratchet_public_key,
                reset_at,
                ..
            } => {
                if reset_marker.is_some_and(|marker| marker >= reset_at) {
                    debug!(contact = %contact_id, %reset_at, "ignoring outdated reset");
                    return Ok(IncomingMessage::OutdatedConversation { contact_id });
                }
                self.accept_reset(&contact_id, &ratchet_public_key, reset_at, &key)
                    .await?;
                Ok(IncomingMessage::Reset { contact_id })
            }
            SealedPayload::Message {
                message, reset_at, ..
            } => {
                // `None` sorts before every reset.
                if reset_at < reset_marker {
                    debug!(contact = %contact_id, "message from before the last reset");
                    return Ok(IncomingMessage::OutdatedConversation { contact_id });
                }

                let received = self.decrypt_incoming(&contact_id, &message, &key).await?;

                // Our handshake data is only needed until the contact seals its messages.
                if self
                    .store
                    .delete_handshake(&contact_id)
                    .await
                    .map_err(MessagingError::store)?
                {
                    debug!(contact = %contact_id, "contact completed the handshake");
                }

                match received {
                    Some((data, fields)) => match data.content {
                        MessageContent::AcceptedInvitation => {
                            Ok(IncomingMessage::AlreadyDecrypted { contact_id })
                        }
                        _ => self.new_message(contact_id, data, fields).await,
                    },
                    None => Ok(IncomingMessage::AlreadyDecrypted { contact_id }),
                }
            }
        }
    }

    /// Tries the shared key of every contact on a sealed envelope.
    async fn match_contact(
        &self,
        sealed: &Wrapped<SealedPayload>,
    ) -> Result<(Contact, ContactLocalKey, SealedPayload), MessagingError> {
        let contacts = ContactStore::contacts(&self.store)
            .await
            .map_err(MessagingError::store)?;

        for contact in contacts {
            let key = self.contact_key(&contact.id).await?;
            let Some(shared_key) = Self::shared_key(&contact, &key)? else {
                continue;
            };
            match unwrap_record(sealed, &shared_key) {
                Ok(payload) => {
                    trace!(contact = %contact.id, "matched sealed envelope");
                    return Ok((contact, key, payload));
                }
                Err(KeyWrapError::Unauthenticated) => continue,
                Err(err) => {
                    warn!(contact = %contact.id, %err, "sealed envelope is malformed");
                    return Err(err.into());
                }
            }
        }

        Err(MessagingError::NoMatchingContact)
    }

    /// Decrypts an encrypted message and moves its fields under the contact local key.
    /// Returns `None` if the message was decrypted before.
    async fn decrypt_incoming(
        &self,
        contact_id: &ContactId,
        message: &[u8],
        key: &ContactLocalKey,
    ) -> Result<Option<(PlainMessageData, EncMessageFields)>, MessagingError> {
        let message = EncryptedMessage::from_bytes(message)?;
        let message_key = match self.resolve_receive_key(contact_id, &message.header).await {
            Ok(message_key) => message_key,
            Err(MessagingError::KeyAlreadyConsumed(key_id)) => {
                debug!(
                    contact = %contact_id,
                    message_number = key_id.message_number,
                    "duplicate message"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let header = message.header.to_bytes();
        let data = MessageCodec::decrypt_bound(&message.body, &message_key, &header);
        if data.has_corrupted_data {
            warn!(contact = %contact_id, "received message with corrupted fields");
        }
        let fields = rewrap_fields(&message.body, &message_key, &header, key, &self.rng)?;
        Ok(Some((data, fields)))
    }

    async fn new_message(
        &self,
        contact_id: ContactId,
        data: PlainMessageData,
        fields: EncMessageFields,
    ) -> Result<IncomingMessage, MessagingError> {
        let sent_at = data.sent_at.as_ref().ok().copied();
        let message_id = self
            .store_message(&contact_id, fields, sent_at, MessageDirection::Received)
            .await?;
        Ok(IncomingMessage::NewMessage {
            contact_id,
            message_id,
            data,
        })
    }
}

/// Moves every field from the message key (bound to the header) to the contact local key.
/// Fields which can't be unwrapped keep their bytes and read as corrupted later on.
fn rewrap_fields(
    fields: &EncMessageFields,
    message_key: &MessageKey,
    header: &[u8],
    key: &ContactLocalKey,
    rng: &Rng,
) -> Result<EncMessageFields, KeyWrapError> {
    Ok(EncMessageFields {
        content: rewrap(&fields.content, message_key, header, key, rng)?,
        sent_at: rewrap(&fields.sent_at, message_key, header, key, rng)?,
        channel: fields
            .channel
            .as_ref()
            .map(|channel| rewrap(channel, message_key, header, key, rng))
            .transpose()?,
        linked_item_id: fields
            .linked_item_id
            .as_ref()
            .map(|item_id| rewrap(item_id, message_key, header, key, rng))
            .transpose()?,
    })
}

fn rewrap<T: Wrappable>(
    field: &Wrapped<T>,
    from: &MessageKey,
    header: &[u8],
    to: &ContactLocalKey,
    rng: &Rng,
) -> Result<Wrapped<T>, KeyWrapError> {
    match unwrap_bound(field, from, header) {
        Ok(value) => wrap(&value, to, rng),
        Err(_) => Ok(field.clone()),
    }
}
