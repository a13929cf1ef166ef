// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence interfaces for Bubbles.
//!
//! Everything stored through these traits is already wrapped: contact fields, conversation
//! state, handshake data and skipped message keys under the contact local key, contact local
//! keys under the master key. Implementations never see plaintext key material, except for the
//! queue key which is expected to live in a platform keystore.
//!
//! All writes which belong to one ratchet step go through a single call
//! ([`RatchetStore::commit_ratchet`], [`RatchetStore::reset_conversation`]) so implementations
//! can run them in one transaction.
//!
//! [`MemoryStore`] implements every trait and is meant for development and tests.
mod memory;
mod traits;

pub use memory::{InnerMemoryStore, MemoryStore};
pub use traits::{
    ContactKeyStore, ContactStore, HandshakeStore, MasterKeyProvider, MessageOrderRepository,
    MessageStore, QueueKeyStore, RatchetStore, RatchetWrite,
};
