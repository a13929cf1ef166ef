// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double ratchet state transitions.
//!
//! Every transition takes a [`Conversation`] by value and returns the next one. Nothing is
//! persisted here: callers store the returned state (together with any skipped message keys)
//! in one write, or drop it, in which case the previous state stays authoritative.
//!
//! Each side runs two kinds of ratchets. The symmetric ratchet turns a chain key into a message
//! key and the next chain key:
//!
//! ```text
//!   chain key 0 ──> chain key 1 ──> chain key 2 ──> ...
//!       │               │               │
//!   message key 0   message key 1   message key 2
//! ```
//!
//! The Diffie-Hellman ratchet replaces both chains whenever a message carries a public key we
//! haven't seen yet. The root key absorbs the new DH output and yields a receiving chain (from
//! our current key pair) and a sending chain (from a freshly generated key pair whose public
//! key goes out with our next message).
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{ChainKey, Conversation, ConversationError, RootKey};
use crate::crypto::hkdf::{HkdfError, hkdf, hkdf_split};
use crate::crypto::x25519::{KeyPair, PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError, Secret};
use crate::ids::{ContactId, ConversationId};
use crate::keys::MessageKey;
use crate::wire::MessageHeader;

const ROOT_INFO: &[u8] = b"bubbles-root-v1";

const MESSAGE_INFO: &[u8] = b"bubbles-message-v1";

const CHAIN_INFO: &[u8] = b"bubbles-chain-v1";

const CONVERSATION_SALT_INFO: &[u8] = b"bubbles-conversation-v1";

/// Lookup key of a cached message key: the sender's ratchet public key and the message number
/// inside that sender chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKeyId {
    pub public_key: PublicKey,
    pub message_number: u32,
}

impl MessageKeyId {
    pub fn new(public_key: PublicKey, message_number: u32) -> Self {
        Self {
            public_key,
            message_number,
        }
    }
}

impl From<&MessageHeader> for MessageKeyId {
    fn from(header: &MessageHeader) -> Self {
        Self::new(header.public_key, header.message_number)
    }
}

/// Result of resolving the key for an incoming message.
#[derive(Debug)]
pub struct ReceivedKey {
    pub conversation: Conversation,
    pub message_key: MessageKey,
    /// Keys derived on the way which belong to messages we haven't received yet.
    pub skipped: Vec<(MessageKeyId, MessageKey)>,
    /// True if a Diffie-Hellman step took place.
    pub dh_step: bool,
}

pub struct DoubleRatchet;

impl DoubleRatchet {
    /// Fresh conversation for the side which sends the invitation (or resets). It can not send
    /// anything before the contact's first reply.
    pub fn initiate(id: ContactId, rng: &Rng) -> Result<Conversation, RatchetError> {
        Ok(Conversation::new(id, KeyPair::generate(rng)?))
    }

    /// Conversation of the side accepting an invitation carrying the initiator's ratchet key.
    ///
    /// The root key starts from the salt of the shared conversation id, so the accepting side
    /// can send straight away and the initiator derives the same chain when the first reply
    /// arrives.
    pub fn accept(
        id: ContactId,
        conversation_id: &ConversationId,
        their_public_key: &PublicKey,
        rng: &Rng,
    ) -> Result<Conversation, RatchetError> {
        let key_pair = KeyPair::generate(rng)?;
        let salt = shared_salt(conversation_id)?;
        let (root_key, sending_chain_key) =
            root_step(&salt, key_pair.secret_key(), their_public_key)?;

        let mut parts = Conversation::new(id, key_pair).into_parts();
        parts.root_key = Some(root_key);
        parts.sending_chain_key = Some(sending_chain_key);
        parts.last_contact_public_key = Some(*their_public_key);
        Ok(Conversation::try_from(parts)?)
    }

    /// Derives the key for the next outgoing message and moves the sending chain forward. The
    /// chain key used for the derivation is gone from the returned state.
    pub fn next_send_key(
        conversation: Conversation,
    ) -> Result<(Conversation, MessageHeader, MessageKey), RatchetError> {
        let Some(chain_key) = conversation.sending_chain_key() else {
            return Err(RatchetError::NotReady);
        };
        let (message_key, next_chain_key) = chain_step(chain_key)?;

        let header = MessageHeader {
            public_key: *conversation.public_key(),
            message_number: conversation.next_message_number(),
            sequence_number: conversation.next_sequence_number(),
        };

        let mut parts = conversation.into_parts();
        parts.sending_chain_key = Some(next_chain_key);
        parts.next_message_number = increment(parts.next_message_number)?;
        parts.next_sequence_number = increment(parts.next_sequence_number)?;

        Ok((Conversation::try_from(parts)?, header, message_key))
    }

    /// Derives the key for an incoming message, stepping the DH ratchet if the header carries a
    /// new public key.
    ///
    /// Keys for message numbers which were jumped over are returned in
    /// [`ReceivedKey::skipped`], including the rest of the previous receiving chain when a DH
    /// step happened. Callers look into their cache of skipped keys before calling this, a
    /// header for an already derived number fails with [`RatchetError::KeyAlreadyConsumed`].
    pub fn resolve_receive_key(
        conversation: Conversation,
        header: &MessageHeader,
        conversation_id: &ConversationId,
        max_skip: u32,
        rng: &Rng,
    ) -> Result<ReceivedKey, RatchetError> {
        let same_chain = conversation.has_receiving_chain()
            && conversation.last_contact_public_key() == Some(&header.public_key);

        if same_chain {
            if let Some(last) = conversation.received_last_message_number() {
                if header.message_number <= last {
                    return Err(RatchetError::KeyAlreadyConsumed(MessageKeyId::from(header)));
                }
            }
            let (conversation, message_key, skipped) =
                Self::derive_receiving(conversation, header.message_number, max_skip)?;
            return Ok(ReceivedKey {
                conversation,
                message_key,
                skipped,
                dh_step: false,
            });
        }

        if conversation.last_contact_public_key() == Some(&header.public_key) {
            // We know this key from an invitation, but the contact never sends with the key
            // it used to invite us.
            return Err(RatchetError::UnexpectedPublicKey);
        }

        let chain_start = header
            .sequence_number
            .checked_sub(header.message_number)
            .ok_or(RatchetError::InvalidHeader)?;

        // Chains of the contact start at increasing sequence numbers. Keys of older chains were
        // either cached on the DH step which left them or have been used since.
        if conversation
            .receiving_chain_start()
            .is_some_and(|current| chain_start < current)
        {
            return Err(RatchetError::KeyAlreadyConsumed(MessageKeyId::from(header)));
        }

        let (conversation, mut skipped) =
            Self::skip_previous_chain(conversation, chain_start, max_skip)?;
        let conversation = Self::dh_step(conversation, header, chain_start, conversation_id, rng)?;
        let (conversation, message_key, mut skipped_current) =
            Self::derive_receiving(conversation, header.message_number, max_skip)?;
        skipped.append(&mut skipped_current);

        Ok(ReceivedKey {
            conversation,
            message_key,
            skipped,
            dh_step: true,
        })
    }

    /// Derives the keys of the current receiving chain which were never used, up to the point
    /// where the contact switched to a new chain.
    fn skip_previous_chain(
        conversation: Conversation,
        next_chain_start: u32,
        max_skip: u32,
    ) -> Result<(Conversation, Vec<(MessageKeyId, MessageKey)>), RatchetError> {
        let (Some(previous_start), Some(public_key)) = (
            conversation.receiving_chain_start(),
            conversation.last_contact_public_key().copied(),
        ) else {
            return Ok((conversation, Vec::new()));
        };

        let until = next_chain_start
            .checked_sub(previous_start)
            .ok_or(RatchetError::InvalidHeader)?;
        let next = conversation
            .received_last_message_number()
            .map_or(0, |last| last.saturating_add(1));
        if next >= until {
            return Ok((conversation, Vec::new()));
        }
        check_skip(until - next, max_skip)?;

        let Some(mut chain_key) = conversation.receiving_chain_key().cloned() else {
            return Ok((conversation, Vec::new()));
        };
        let mut skipped = Vec::with_capacity((until - next) as usize);
        for message_number in next..until {
            let (message_key, next_chain_key) = chain_step(&chain_key)?;
            skipped.push((MessageKeyId::new(public_key, message_number), message_key));
            chain_key = next_chain_key;
        }

        let mut parts = conversation.into_parts();
        parts.receiving_chain_key = Some(chain_key);
        parts.received_last_message_number = Some(until - 1);
        Ok((Conversation::try_from(parts)?, skipped))
    }

    fn dh_step(
        conversation: Conversation,
        header: &MessageHeader,
        chain_start: u32,
        conversation_id: &ConversationId,
        rng: &Rng,
    ) -> Result<Conversation, RatchetError> {
        let root_key = match conversation.root_key() {
            Some(root_key) => root_key.clone(),
            None => shared_salt(conversation_id)?,
        };

        let (root_key, receiving_chain_key) = root_step(
            &root_key,
            conversation.personal_key_pair().secret_key(),
            &header.public_key,
        )?;

        let key_pair = KeyPair::generate(rng)?;
        let (root_key, sending_chain_key) =
            root_step(&root_key, key_pair.secret_key(), &header.public_key)?;

        let mut parts = conversation.into_parts();
        parts.personal_key_pair = key_pair;
        parts.root_key = Some(root_key);
        parts.receiving_chain_key = Some(receiving_chain_key);
        parts.sending_chain_key = Some(sending_chain_key);
        parts.last_contact_public_key = Some(header.public_key);
        parts.next_message_number = 0;
        parts.received_last_message_number = None;
        parts.receiving_chain_start = Some(chain_start);
        Ok(Conversation::try_from(parts)?)
    }

    /// Moves the receiving chain forward to `message_number`, returning its key and the keys
    /// for the numbers in between.
    fn derive_receiving(
        conversation: Conversation,
        message_number: u32,
        max_skip: u32,
    ) -> Result<(Conversation, MessageKey, Vec<(MessageKeyId, MessageKey)>), RatchetError> {
        let (Some(chain_key), Some(public_key)) = (
            conversation.receiving_chain_key().cloned(),
            conversation.last_contact_public_key().copied(),
        ) else {
            return Err(RatchetError::NotReady);
        };

        let next = conversation
            .received_last_message_number()
            .map_or(0, |last| last.saturating_add(1));
        let count = message_number
            .checked_sub(next)
            .ok_or(RatchetError::KeyAlreadyConsumed(MessageKeyId::new(
                public_key,
                message_number,
            )))?;
        check_skip(count, max_skip)?;

        let mut chain_key = chain_key;
        let mut skipped = Vec::with_capacity(count as usize);
        for skipped_number in next..message_number {
            let (message_key, next_chain_key) = chain_step(&chain_key)?;
            skipped.push((MessageKeyId::new(public_key, skipped_number), message_key));
            chain_key = next_chain_key;
        }
        let (message_key, next_chain_key) = chain_step(&chain_key)?;

        let mut parts = conversation.into_parts();
        parts.receiving_chain_key = Some(next_chain_key);
        parts.received_last_message_number = Some(message_number);
        Ok((Conversation::try_from(parts)?, message_key, skipped))
    }
}

/// Initial root key derived from the conversation id both parties know from the invitation.
fn shared_salt(conversation_id: &ConversationId) -> Result<RootKey, RatchetError> {
    let bytes = conversation_id.as_bytes();
    Ok(Secret::from_bytes(hkdf(
        bytes,
        bytes,
        Some(CONVERSATION_SALT_INFO),
    )?))
}

fn root_step(
    root_key: &RootKey,
    secret_key: &SecretKey,
    their_public_key: &PublicKey,
) -> Result<(RootKey, ChainKey), RatchetError> {
    let dh = secret_key.calculate_agreement(their_public_key)?;
    let (root_key, chain_key) = hkdf_split(root_key.as_bytes(), dh.as_bytes(), ROOT_INFO)?;
    Ok((Secret::from_bytes(root_key), Secret::from_bytes(chain_key)))
}

fn chain_step(chain_key: &ChainKey) -> Result<(MessageKey, ChainKey), RatchetError> {
    let message_key = hkdf(&[], chain_key.as_bytes(), Some(MESSAGE_INFO))?;
    let next_chain_key = hkdf(&[], chain_key.as_bytes(), Some(CHAIN_INFO))?;
    Ok((
        MessageKey::from_secret(Secret::from_bytes(message_key)),
        Secret::from_bytes(next_chain_key),
    ))
}

fn check_skip(count: u32, max_skip: u32) -> Result<(), RatchetError> {
    if count > max_skip {
        return Err(RatchetError::TooManySkipped(count, max_skip));
    }
    Ok(())
}

fn increment(counter: u32) -> Result<u32, RatchetError> {
    counter.checked_add(1).ok_or(RatchetError::CounterOverflow)
}

#[derive(Debug, Error)]
pub enum RatchetError {
    #[error("no sending chain established yet")]
    NotReady,

    #[error("message key {0:?} was already used or never cached")]
    KeyAlreadyConsumed(MessageKeyId),

    #[error("message would skip {0} keys, at most {1} are allowed")]
    TooManySkipped(u32, u32),

    #[error("message uses the public key of the invitation")]
    UnexpectedPublicKey,

    #[error("malformed message header")]
    InvalidHeader,

    #[error("message counter overflow")]
    CounterOverflow,

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Rng(#[from] RngError),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use crate::conversation::Conversation;
    use crate::crypto::Rng;
    use crate::ids::{ContactId, ConversationId};
    use crate::keys::MessageKey;
    use crate::wire::MessageHeader;

    use super::{DoubleRatchet, MessageKeyId, RatchetError, chain_step};

    const MAX_SKIP: u32 = 100;

    struct Party {
        conversation: Conversation,
        cache: HashMap<MessageKeyId, MessageKey>,
    }

    impl Party {
        fn new(conversation: Conversation) -> Self {
            Self {
                conversation,
                cache: HashMap::new(),
            }
        }

        fn send(&mut self) -> (MessageHeader, MessageKey) {
            let (conversation, header, key) =
                DoubleRatchet::next_send_key(self.conversation.clone()).unwrap();
            self.conversation = conversation;
            (header, key)
        }

        fn receive(
            &mut self,
            header: &MessageHeader,
            conversation_id: &ConversationId,
            rng: &Rng,
        ) -> Result<MessageKey, RatchetError> {
            if let Some(key) = self.cache.remove(&MessageKeyId::from(header)) {
                return Ok(key);
            }
            let received = DoubleRatchet::resolve_receive_key(
                self.conversation.clone(),
                header,
                conversation_id,
                MAX_SKIP,
                rng,
            )?;
            self.conversation = received.conversation;
            self.cache.extend(received.skipped);
            Ok(received.message_key)
        }
    }

    /// Alice invites, Bob accepts and sends his first message.
    fn setup(rng: &Rng) -> (Party, Party, ConversationId) {
        let conversation_id = ConversationId::random(rng).unwrap();
        let alice = DoubleRatchet::initiate(ContactId::random(rng).unwrap(), rng).unwrap();
        let bob = DoubleRatchet::accept(
            ContactId::random(rng).unwrap(),
            &conversation_id,
            alice.public_key(),
            rng,
        )
        .unwrap();
        (Party::new(alice), Party::new(bob), conversation_id)
    }

    #[test]
    fn initiator_can_not_send() {
        let rng = Rng::from_seed([1; 32]);
        let alice = DoubleRatchet::initiate(ContactId::random(&rng).unwrap(), &rng).unwrap();
        assert_matches!(
            DoubleRatchet::next_send_key(alice),
            Err(RatchetError::NotReady)
        );
    }

    #[test]
    fn chain_step_moves_forward() {
        let rng = Rng::from_seed([1; 32]);
        let (_, mut bob, _) = setup(&rng);

        let chain_before = bob.conversation.sending_chain_key().cloned().unwrap();
        let (header, key_0) = bob.send();
        let chain_after = bob.conversation.sending_chain_key().cloned().unwrap();

        assert_eq!(header.message_number, 0);
        assert_eq!(header.sequence_number, 0);
        assert_ne!(chain_before, chain_after);

        // The old chain key yields the key we got, the new one only the keys after it.
        let (expected_0, _) = chain_step(&chain_before).unwrap();
        assert_eq!(expected_0, key_0);
        let (key_1, _) = chain_step(&chain_after).unwrap();
        assert_ne!(key_0, key_1);

        let (header, _) = bob.send();
        assert_eq!(header.message_number, 1);
        assert_eq!(bob.conversation.next_message_number(), 2);
        assert_eq!(bob.conversation.next_sequence_number(), 2);
    }

    #[test]
    fn both_sides_derive_same_keys() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, mut bob, conversation_id) = setup(&rng);

        let (header, bob_key) = bob.send();
        let alice_key = alice.receive(&header, &conversation_id, &rng).unwrap();
        assert_eq!(alice_key, bob_key);
        assert!(alice.conversation.has_sending_chain());
        assert_eq!(alice.conversation.received_last_message_number(), Some(0));

        // Direction changes several times, every change is a DH step.
        for round in 0..3 {
            let (header, alice_key) = alice.send();
            let bob_key = bob.receive(&header, &conversation_id, &rng).unwrap();
            assert_eq!(alice_key, bob_key, "round {round}");

            let (header_1, bob_key_1) = bob.send();
            let (header_2, bob_key_2) = bob.send();
            assert_eq!(header_1.public_key, header_2.public_key);
            assert_eq!(
                alice.receive(&header_1, &conversation_id, &rng).unwrap(),
                bob_key_1
            );
            assert_eq!(
                alice.receive(&header_2, &conversation_id, &rng).unwrap(),
                bob_key_2
            );
        }
    }

    #[test]
    fn out_of_order() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, mut bob, conversation_id) = setup(&rng);

        let (header_1, key_1) = bob.send();
        let (header_2, key_2) = bob.send();
        let (header_3, key_3) = bob.send();

        assert_eq!(alice.receive(&header_1, &conversation_id, &rng).unwrap(), key_1);
        assert_eq!(alice.receive(&header_3, &conversation_id, &rng).unwrap(), key_3);
        assert_eq!(alice.cache.len(), 1);
        assert_eq!(alice.receive(&header_2, &conversation_id, &rng).unwrap(), key_2);
        assert!(alice.cache.is_empty());

        // Each key is handed out once.
        assert_matches!(
            alice.receive(&header_2, &conversation_id, &rng),
            Err(RatchetError::KeyAlreadyConsumed(_))
        );
        assert_matches!(
            alice.receive(&header_1, &conversation_id, &rng),
            Err(RatchetError::KeyAlreadyConsumed(_))
        );
    }

    #[test]
    fn late_message_from_previous_chain() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, mut bob, conversation_id) = setup(&rng);

        let (header, _) = bob.send();
        alice.receive(&header, &conversation_id, &rng).unwrap();

        // Alice sends two messages, Bob only gets the first one before answering.
        let (header_1, _) = alice.send();
        let (header_2, key_2) = alice.send();
        bob.receive(&header_1, &conversation_id, &rng).unwrap();

        let (header, _) = bob.send();
        alice.receive(&header, &conversation_id, &rng).unwrap();

        // Alice answers from a new chain. Bob caches the rest of the old one on the DH step.
        let (header_3, key_3) = alice.send();
        assert_ne!(header_3.public_key, header_2.public_key);
        assert_eq!(header_3.message_number, 0);
        assert_eq!(header_3.sequence_number, 2);
        assert_eq!(bob.receive(&header_3, &conversation_id, &rng).unwrap(), key_3);
        assert_eq!(bob.cache.len(), 1);

        assert_eq!(bob.receive(&header_2, &conversation_id, &rng).unwrap(), key_2);
        assert!(bob.cache.is_empty());

        // Redelivered messages of the old chain leave the state alone.
        let before = bob.conversation.clone();
        for header in [header_1, header_2] {
            assert_matches!(
                bob.receive(&header, &conversation_id, &rng),
                Err(RatchetError::KeyAlreadyConsumed(key_id))
                    if key_id == MessageKeyId::from(&header)
            );
        }
        assert_eq!(bob.conversation, before);
    }

    #[test]
    fn too_many_skipped() {
        let rng = Rng::from_seed([1; 32]);
        let (alice, mut bob, conversation_id) = setup(&rng);

        let mut header = bob.send().0;
        header.message_number = MAX_SKIP + 1;
        header.sequence_number = MAX_SKIP + 1;
        assert_matches!(
            DoubleRatchet::resolve_receive_key(
                alice.conversation,
                &header,
                &conversation_id,
                MAX_SKIP,
                &rng
            ),
            Err(RatchetError::TooManySkipped(101, 100))
        );
    }

    #[test]
    fn invalid_header() {
        let rng = Rng::from_seed([1; 32]);
        let (alice, mut bob, conversation_id) = setup(&rng);

        let mut header = bob.send().0;
        header.message_number = 5;
        header.sequence_number = 2;
        assert_matches!(
            DoubleRatchet::resolve_receive_key(
                alice.conversation,
                &header,
                &conversation_id,
                MAX_SKIP,
                &rng
            ),
            Err(RatchetError::InvalidHeader)
        );
    }

    #[test]
    fn invitation_key_is_not_a_sending_key() {
        let rng = Rng::from_seed([1; 32]);
        let (alice, bob, conversation_id) = setup(&rng);

        let header = MessageHeader {
            public_key: *alice.conversation.public_key(),
            message_number: 0,
            sequence_number: 0,
        };
        assert_matches!(
            DoubleRatchet::resolve_receive_key(
                bob.conversation,
                &header,
                &conversation_id,
                MAX_SKIP,
                &rng
            ),
            Err(RatchetError::UnexpectedPublicKey)
        );
    }

    #[test]
    fn different_conversation_ids_disagree() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, mut bob, _) = setup(&rng);
        let other_id = ConversationId::random(&rng).unwrap();

        let (header, bob_key) = bob.send();
        let alice_key = alice.receive(&header, &other_id, &rng).unwrap();
        assert_ne!(alice_key, bob_key);
    }
}
