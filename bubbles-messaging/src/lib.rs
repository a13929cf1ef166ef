// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversations between two parties of a Bubbles vault.
//!
//! [`MessagingContext`] runs the double ratchet of every contact on top of the stores from
//! `bubbles-store`: it creates and accepts invitations, completes the handshake, encrypts and
//! receives envelopes, queues messages until a conversation can send and keeps the local
//! message history in order.
//!
//! Operations for one contact are serialized through a per-contact lock, every ratchet step is
//! persisted in a single store write.
//!
//! ```ignore
//! let (bob_id, invitation) = alice.create_invitation(vault, "Bob", SharingMode::Deeplink).await?;
//! // .. hand `invitation` to Bob
//! let IncomingMessage::Invitation(invitation) = bob.receive(&invitation).await? else { .. };
//! let (alice_id, reply) = bob
//!     .accept_invitation(vault, "Alice", SharingMode::Deeplink, &invitation)
//!     .await?;
//! // .. hand `reply` to Alice
//! alice.receive(&reply).await?;
//! let envelope = alice.encrypt_message(&bob_id, "hello", Timestamp::now(), None, None).await?;
//! ```
mod config;
mod contacts;
mod context;
mod engine;
mod error;
mod locks;
mod order;
mod receive;
mod send;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::Config;
pub use context::{MessagingContext, MessagingStore};
pub use error::MessagingError;
pub use order::{MessageOrderCalculator, OrderResult};
pub use receive::IncomingMessage;
