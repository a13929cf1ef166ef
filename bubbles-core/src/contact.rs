// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contacts and their stored messages.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::EncMessageFields;
use crate::ids::{ContactId, ConversationId, MessageId, Timestamp, VaultId};
use crate::key_wrap::{Wrappable, Wrapped};
use crate::keys::EncSharedKey;

/// The remote party of a conversation, as stored locally.
///
/// All `enc_` fields are wrapped under the contact local key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub vault_id: VaultId,
    pub enc_name: Wrapped<String>,
    /// Set once the handshake completed.
    pub enc_shared_key: Option<EncSharedKey>,
    pub conversation_id: ConversationId,
    pub enc_sharing_mode: Wrapped<SharingMode>,
    pub updated_at: Timestamp,
    pub consulted_at: Option<Timestamp>,
    /// Time of the last conversation reset.
    pub enc_reset_marker: Option<Wrapped<Timestamp>>,
}

/// How messages for this contact leave the device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharingMode {
    #[default]
    Deeplink,
    CypherText,
    Archive,
}

impl SharingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharingMode::Deeplink => "deeplink",
            SharingMode::CypherText => "cypher_text",
            SharingMode::Archive => "archive",
        }
    }
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "deeplink" => Ok(SharingMode::Deeplink),
            "cypher_text" => Ok(SharingMode::CypherText),
            "archive" => Ok(SharingMode::Archive),
            other => Err(format!("unknown sharing mode '{other}'")),
        }
    }
}

/// Wrapped like a `String` holding the mode's name.
impl Wrappable for SharingMode {
    const TAG: u8 = <String as Wrappable>::TAG;

    fn to_payload(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        std::str::from_utf8(payload).ok()?.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    Sent,
    Received,
}

/// Message stored for a contact, wrapped under the contact local key.
#[derive(Clone, Debug, PartialEq)]
pub struct SafeMessage {
    pub id: MessageId,
    pub contact_id: ContactId,
    pub fields: EncMessageFields,
    pub direction: MessageDirection,
    pub is_read: bool,
    /// Position among the contact's messages, see the ordering in `bubbles-messaging`.
    pub order: f64,
}

/// Outgoing message waiting for a sending chain, its fields wrapped under the queue key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub contact_id: ContactId,
    pub fields: EncMessageFields,
}

/// Lightweight view on a stored message used to find its position.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageOrder {
    pub id: MessageId,
    pub order: f64,
    pub enc_sent_at: Wrapped<Timestamp>,
}

impl From<&SafeMessage> for MessageOrder {
    fn from(message: &SafeMessage) -> Self {
        Self {
            id: message.id,
            order: message.order,
            enc_sent_at: message.fields.sent_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::key_wrap::{Wrapped, unwrap, wrap};
    use crate::keys::ContactLocalKey;

    use super::SharingMode;

    #[test]
    fn sharing_mode_is_a_string() {
        let rng = Rng::from_seed([1; 32]);
        let key = ContactLocalKey::generate(&rng).unwrap();

        let wrapped = wrap(&SharingMode::Archive, &key, &rng).unwrap();
        assert_eq!(unwrap(&wrapped, &key).unwrap(), SharingMode::Archive);

        let as_string = Wrapped::<String>::from_bytes(wrapped.into_bytes());
        assert_eq!(unwrap(&as_string, &key).unwrap(), "archive");

        let unknown = wrap(&"carrier pigeon".to_string(), &key, &rng).unwrap();
        let unknown = Wrapped::<SharingMode>::from_bytes(unknown.into_bytes());
        assert!(unwrap(&unknown, &key).is_err());
    }
}
