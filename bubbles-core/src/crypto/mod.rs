// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic building blocks used by key wrapping and the double ratchet.
//!
//! All algorithms are standard constructions from the RustCrypto and dalek ecosystems:
//! XChaCha20-Poly1305 for authenticated encryption, HKDF-SHA256 for key derivation and X25519
//! for Diffie-Hellman key agreement.
pub mod aead;
pub mod hkdf;
mod rng;
mod secret;
pub mod x25519;

pub use rng::{Rng, RngError};
pub use secret::Secret;
