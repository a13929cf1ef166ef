// SPDX-License-Identifier: MIT OR Apache-2.0

//! XChaCha20-Poly1305 authenticated encryption with additional data (AEAD), 256-bit key and
//! extended 192-bit nonce.
//!
//! The large nonce allows picking nonces at random for every encryption under long-lived keys
//! (contact local keys, the queue key) without tracking counters.
use chacha20poly1305::{AeadInPlace, Key, KeyInit, XChaCha20Poly1305, XNonce};
use thiserror::Error;

pub const AEAD_KEY_SIZE: usize = 32;

pub const AEAD_NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag appended to every ciphertext.
pub const AEAD_TAG_SIZE: usize = 16;

pub type AeadKey = [u8; AEAD_KEY_SIZE];

pub type AeadNonce = [u8; AEAD_NONCE_SIZE];

/// Encrypts `plaintext` and returns the ciphertext with the authentication tag attached at the
/// end.
pub fn aead_encrypt(
    key: &AeadKey,
    plaintext: &[u8],
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut ciphertext = Vec::from(plaintext);
    cipher
        .encrypt_in_place(
            XNonce::from_slice(&nonce),
            aad.unwrap_or_default(),
            &mut ciphertext,
        )
        .map_err(|_| AeadError::Encrypt)?;
    Ok(ciphertext)
}

/// Verifies the authentication tag at the end of `ciphertext_tag` and decrypts it.
pub fn aead_decrypt(
    key: &AeadKey,
    ciphertext_tag: &[u8],
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, AeadError> {
    if ciphertext_tag.len() < AEAD_TAG_SIZE {
        return Err(AeadError::Decrypt);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut plaintext = Vec::from(ciphertext_tag);
    cipher
        .decrypt_in_place(
            XNonce::from_slice(&nonce),
            aad.unwrap_or_default(),
            &mut plaintext,
        )
        .map_err(|_| AeadError::Decrypt)?;
    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("could not encrypt with xchacha20poly1305 aead")]
    Encrypt,

    #[error("could not decrypt with xchacha20poly1305 aead")]
    Decrypt,
}
