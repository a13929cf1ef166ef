// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key agreement on the contact shared key.
//!
//! Both sides hold [`HandshakeData`] until they know the other side's handshake public key.
//! The initiator learns it from the first reply, the accepting side from the invitation. The
//! shared key derived from it seals every envelope after the handshake, which is how incoming
//! envelopes are matched to a contact without revealing who they are for.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::x25519::{KeyPair, PublicKey, X25519Error};
use crate::crypto::{Rng, RngError, Secret};
use crate::ids::{ConversationId, Timestamp};
use crate::key_wrap::Wrapped;
use crate::keys::SharedKey;

const SHARED_KEY_INFO: &[u8] = b"bubbles-shared-key-v1";

/// Handshake data wrapped under the contact local key.
pub type EncHandshakeData = Wrapped<HandshakeData>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeData {
    conversation_id: ConversationId,
    key_pair: KeyPair,
    created_at: Timestamp,
}

impl HandshakeData {
    pub fn generate(conversation_id: ConversationId, rng: &Rng) -> Result<Self, RngError> {
        Ok(Self {
            conversation_id,
            key_pair: KeyPair::generate(rng)?,
            created_at: Timestamp::now(),
        })
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Agrees on the key shared with the contact owning `their_public_key`.
    pub fn derive_shared_key(
        &self,
        their_public_key: &PublicKey,
    ) -> Result<SharedKey, HandshakeError> {
        let dh = self
            .key_pair
            .secret_key()
            .calculate_agreement(their_public_key)?;
        let key: [u8; 32] = hkdf(
            self.conversation_id.as_bytes(),
            dh.as_bytes(),
            Some(SHARED_KEY_INFO),
        )?;
        Ok(SharedKey::from_secret(Secret::from_bytes(key)))
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),
}
