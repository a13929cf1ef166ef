// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symmetric keys used for wrapping.
//!
//! ```text
//! MasterKey ──wraps──> ContactLocalKey ──wraps──> contact fields, Conversation, HandshakeData,
//!                                                 skipped MessageKeys, stored messages
//! SharedKey  ──wraps──> sealed envelopes exchanged with the contact
//! MessageKey ──wraps──> one message on the wire
//! QueueKey   ──wraps──> messages waiting to be sent
//! ```
use serde::{Deserialize, Serialize};

use crate::crypto::{Rng, RngError, Secret};
use crate::key_wrap::{KEY_TAG, KeyWrapError, Wrappable, Wrapped, unwrap, wrap};

pub const WRAPPING_KEY_SIZE: usize = 32;

/// Key which can be used with [`crate::key_wrap`].
pub trait WrappingKey {
    fn wrapping_key(&self) -> &Secret<WRAPPING_KEY_SIZE>;
}

macro_rules! symmetric_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name(Secret<WRAPPING_KEY_SIZE>);

        impl $name {
            pub fn generate(rng: &Rng) -> Result<Self, RngError> {
                Ok(Self(rng.random_secret()?))
            }

            pub(crate) fn from_secret(secret: Secret<WRAPPING_KEY_SIZE>) -> Self {
                Self(secret)
            }
        }

        impl WrappingKey for $name {
            fn wrapping_key(&self) -> &Secret<WRAPPING_KEY_SIZE> {
                &self.0
            }
        }

        impl Wrappable for $name {
            const TAG: u8 = KEY_TAG;

            fn to_payload(&self) -> Vec<u8> {
                self.0.as_bytes().to_vec()
            }

            fn from_payload(payload: &[u8]) -> Option<Self> {
                Secret::try_from_slice(payload).map(Self)
            }
        }
    };
}

symmetric_key!(
    /// Vault-wide key provided by the platform keystore.
    MasterKey
);

symmetric_key!(
    /// Per-contact key, created together with the contact and never rotated.
    ContactLocalKey
);

symmetric_key!(
    /// Key agreed with the contact during the handshake. Seals every envelope after it.
    SharedKey
);

symmetric_key!(
    /// One-time key derived from a ratchet chain for exactly one message.
    MessageKey
);

symmetric_key!(
    /// Process-wide key protecting messages queued for sending.
    QueueKey
);

pub type EncContactLocalKey = Wrapped<ContactLocalKey>;

pub type EncSharedKey = Wrapped<SharedKey>;

pub type EncMessageKey = Wrapped<MessageKey>;

impl MasterKey {
    pub fn wrap_contact_key(
        &self,
        key: &ContactLocalKey,
        rng: &Rng,
    ) -> Result<EncContactLocalKey, KeyWrapError> {
        wrap(key, self, rng)
    }

    pub fn unwrap_contact_key(
        &self,
        key: &EncContactLocalKey,
    ) -> Result<ContactLocalKey, KeyWrapError> {
        unwrap(key, self)
    }
}
