use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use veil_core::errors::ExchangeError;

use crate::handshake::SymmetricKey;

pub const NONCE_LEN: usize = 12;

/// Encrypt one payload under the per-exchange key with a fresh random nonce.
/// The caller must never reuse a nonce under the same key; drawing 96 random
/// bits per call from the OS keeps that property without bookkeeping.
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), ExchangeError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| ExchangeError::Encrypt)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt one frame. Fails on any tag mismatch — a tampered nonce,
/// ciphertext, or wrong key yields `Decrypt` and no plaintext bytes.
pub fn open(key: &SymmetricKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    if nonce.len() != NONCE_LEN {
        return Err(ExchangeError::Decrypt);
    }
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(nonce);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| ExchangeError::Decrypt)
}
