// SPDX-License-Identifier: MIT OR Apache-2.0

//! Field-wise encryption of message contents.
//!
//! Every field is wrapped on its own. Decryption never fails as a whole: fields which can't be
//! unwrapped are reported individually and flag the message as corrupted, so a timestamp can
//! still be shown next to unreadable content.
use serde::{Deserialize, Serialize};

use crate::crypto::Rng;
use crate::ids::{ItemId, Timestamp};
use crate::key_wrap::{KeyWrapError, Wrapped, unwrap, unwrap_bound, wrap_bound};
use crate::keys::WrappingKey;

/// Content of the first reply after accepting an invitation.
pub const ACCEPTED_INVITATION_SENTINEL: &str = "[[bubbles:accepted-invitation]]";

/// Content of a message whose payload is the linked item.
pub const SHARED_ITEM_SENTINEL: &str = "[[bubbles:shared-item]]";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncMessageFields {
    pub content: Wrapped<String>,
    pub sent_at: Wrapped<Timestamp>,
    pub channel: Option<Wrapped<String>>,
    pub linked_item_id: Option<Wrapped<ItemId>>,
}

pub type FieldResult<T> = Result<T, KeyWrapError>;

#[derive(Debug)]
pub enum MessageContent {
    Text(FieldResult<String>),
    AcceptedInvitation,
    SharedItem(Option<FieldResult<ItemId>>),
}

#[derive(Debug)]
pub struct PlainMessageData {
    pub sent_at: FieldResult<Timestamp>,
    pub channel: Option<FieldResult<String>>,
    pub content: MessageContent,
    pub has_corrupted_data: bool,
}

pub struct MessageCodec;

impl MessageCodec {
    pub fn encrypt(
        content: &str,
        sent_at: Timestamp,
        channel: Option<&str>,
        linked_item_id: Option<ItemId>,
        key: &impl WrappingKey,
        rng: &Rng,
    ) -> Result<EncMessageFields, KeyWrapError> {
        Self::encrypt_bound(content, sent_at, channel, linked_item_id, key, &[], rng)
    }

    /// Encrypts every field bound to `associated_data`, e.g. the header of the message the
    /// fields are sent with.
    pub fn encrypt_bound(
        content: &str,
        sent_at: Timestamp,
        channel: Option<&str>,
        linked_item_id: Option<ItemId>,
        key: &impl WrappingKey,
        associated_data: &[u8],
        rng: &Rng,
    ) -> Result<EncMessageFields, KeyWrapError> {
        Ok(EncMessageFields {
            content: wrap_bound(&content.to_string(), key, associated_data, rng)?,
            sent_at: wrap_bound(&sent_at, key, associated_data, rng)?,
            channel: channel
                .map(|channel| wrap_bound(&channel.to_string(), key, associated_data, rng))
                .transpose()?,
            linked_item_id: linked_item_id
                .map(|item_id| wrap_bound(&item_id, key, associated_data, rng))
                .transpose()?,
        })
    }

    pub fn decrypt(fields: &EncMessageFields, key: &impl WrappingKey) -> PlainMessageData {
        Self::decrypt_bound(fields, key, &[])
    }

    pub fn decrypt_bound(
        fields: &EncMessageFields,
        key: &impl WrappingKey,
        associated_data: &[u8],
    ) -> PlainMessageData {
        let sent_at = unwrap_bound(&fields.sent_at, key, associated_data);
        let channel = fields
            .channel
            .as_ref()
            .map(|channel| unwrap_bound(channel, key, associated_data));

        let content = match unwrap_bound(&fields.content, key, associated_data) {
            Ok(content) if content == ACCEPTED_INVITATION_SENTINEL => {
                MessageContent::AcceptedInvitation
            }
            Ok(content) if content == SHARED_ITEM_SENTINEL => MessageContent::SharedItem(
                fields
                    .linked_item_id
                    .as_ref()
                    .map(|item_id| unwrap_bound(item_id, key, associated_data)),
            ),
            content => MessageContent::Text(content),
        };

        let content_corrupted = match &content {
            MessageContent::Text(result) => result.is_err(),
            MessageContent::SharedItem(result) => matches!(result, Some(Err(_))),
            MessageContent::AcceptedInvitation => false,
        };
        let has_corrupted_data = content_corrupted
            || sent_at.is_err()
            || matches!(channel, Some(Err(_)));

        PlainMessageData {
            sent_at,
            channel,
            content,
            has_corrupted_data,
        }
    }

    /// Moves all fields from one key to another, e.g. from the queue key to a message key. The
    /// new fields are bound to `associated_data`.
    pub fn reencrypt(
        fields: &EncMessageFields,
        from: &impl WrappingKey,
        to: &impl WrappingKey,
        associated_data: &[u8],
        rng: &Rng,
    ) -> Result<EncMessageFields, KeyWrapError> {
        Ok(EncMessageFields {
            content: wrap_bound(&unwrap(&fields.content, from)?, to, associated_data, rng)?,
            sent_at: wrap_bound(&unwrap(&fields.sent_at, from)?, to, associated_data, rng)?,
            channel: fields
                .channel
                .as_ref()
                .map(|channel| wrap_bound(&unwrap(channel, from)?, to, associated_data, rng))
                .transpose()?,
            linked_item_id: fields
                .linked_item_id
                .as_ref()
                .map(|item_id| wrap_bound(&unwrap(item_id, from)?, to, associated_data, rng))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::crypto::Rng;
    use crate::ids::{ItemId, Timestamp};
    use crate::key_wrap::{KeyWrapError, wrap};
    use crate::keys::{MessageKey, QueueKey};

    use super::{
        ACCEPTED_INVITATION_SENTINEL, MessageCodec, MessageContent, SHARED_ITEM_SENTINEL,
    };

    #[test]
    fn text_message() {
        let rng = Rng::from_seed([1; 32]);
        let key = MessageKey::generate(&rng).unwrap();
        let sent_at = Timestamp::from_millis(1_000);

        let fields =
            MessageCodec::encrypt("Hello", sent_at, Some("general"), None, &key, &rng).unwrap();
        let plain = MessageCodec::decrypt(&fields, &key);

        assert!(!plain.has_corrupted_data);
        assert_eq!(plain.sent_at.unwrap(), sent_at);
        assert_eq!(plain.channel.unwrap().unwrap(), "general");
        assert_matches!(plain.content, MessageContent::Text(Ok(text)) if text == "Hello");
    }

    #[test]
    fn sentinels() {
        let rng = Rng::from_seed([1; 32]);
        let key = MessageKey::generate(&rng).unwrap();

        let fields = MessageCodec::encrypt(
            ACCEPTED_INVITATION_SENTINEL,
            Timestamp::now(),
            None,
            None,
            &key,
            &rng,
        )
        .unwrap();
        assert_matches!(
            MessageCodec::decrypt(&fields, &key).content,
            MessageContent::AcceptedInvitation
        );

        let item_id = ItemId::random(&rng).unwrap();
        let fields = MessageCodec::encrypt(
            SHARED_ITEM_SENTINEL,
            Timestamp::now(),
            None,
            Some(item_id),
            &key,
            &rng,
        )
        .unwrap();
        assert_matches!(
            MessageCodec::decrypt(&fields, &key).content,
            MessageContent::SharedItem(Some(Ok(id))) if id == item_id
        );
    }

    #[test]
    fn corrupted_field_keeps_the_others() {
        let rng = Rng::from_seed([1; 32]);
        let key = MessageKey::generate(&rng).unwrap();
        let other_key = MessageKey::generate(&rng).unwrap();
        let sent_at = Timestamp::from_millis(1_000);

        let mut fields =
            MessageCodec::encrypt("Hello", sent_at, None, None, &key, &rng).unwrap();
        fields.content = wrap(&"Hello".to_string(), &other_key, &rng).unwrap();

        let plain = MessageCodec::decrypt(&fields, &key);
        assert!(plain.has_corrupted_data);
        assert_eq!(plain.sent_at.unwrap(), sent_at);
        assert_matches!(
            plain.content,
            MessageContent::Text(Err(KeyWrapError::Unauthenticated))
        );

        // Wrong key altogether: every field fails, nothing panics.
        let plain = MessageCodec::decrypt(&fields, &other_key);
        assert!(plain.has_corrupted_data);
        assert!(plain.sent_at.is_err());
    }

    #[test]
    fn reencrypt_from_queue_key() {
        let rng = Rng::from_seed([1; 32]);
        let queue_key = QueueKey::generate(&rng).unwrap();
        let message_key = MessageKey::generate(&rng).unwrap();
        let item_id = ItemId::random(&rng).unwrap();

        let queued = MessageCodec::encrypt(
            SHARED_ITEM_SENTINEL,
            Timestamp::from_millis(5),
            Some("files"),
            Some(item_id),
            &queue_key,
            &rng,
        )
        .unwrap();
        let fields =
            MessageCodec::reencrypt(&queued, &queue_key, &message_key, b"header", &rng).unwrap();

        let plain = MessageCodec::decrypt_bound(&fields, &message_key, b"header");
        assert!(!plain.has_corrupted_data);
        assert_eq!(plain.channel.unwrap().unwrap(), "files");
        assert_matches!(plain.content, MessageContent::SharedItem(Some(Ok(id))) if id == item_id);

        assert!(MessageCodec::reencrypt(&queued, &message_key, &queue_key, &[], &rng).is_err());
    }

    #[test]
    fn fields_are_bound_to_their_header() {
        let rng = Rng::from_seed([1; 32]);
        let key = MessageKey::generate(&rng).unwrap();
        let sent_at = Timestamp::from_millis(1_000);

        let fields = MessageCodec::encrypt_bound(
            "Hello",
            sent_at,
            Some("general"),
            None,
            &key,
            b"header",
            &rng,
        )
        .unwrap();
        let plain = MessageCodec::decrypt_bound(&fields, &key, b"header");
        assert!(!plain.has_corrupted_data);
        assert_matches!(plain.content, MessageContent::Text(Ok(text)) if text == "Hello");

        let plain = MessageCodec::decrypt_bound(&fields, &key, b"forged");
        assert!(plain.has_corrupted_data);
        assert!(plain.sent_at.is_err());
        assert_matches!(plain.channel, Some(Err(KeyWrapError::Unauthenticated)));
        assert_matches!(
            plain.content,
            MessageContent::Text(Err(KeyWrapError::Unauthenticated))
        );
    }
}
