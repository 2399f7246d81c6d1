//! # Stream Cipher
//!
//! AES-128 in CFB8 mode with key = IV = shared secret, the symmetric
//! transform negotiated during login. Each direction of each leg owns an
//! independent keystream, so encryptor and decryptor are separate values.
//!
//! ## Security
//! - Shared secrets are wiped from memory on drop (zeroize crate)
//! - Secret material never appears in `Debug` output

use crate::error::{ProtocolError, Result};
use aes::cipher::inout::InOutBuf;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::fmt;
use zeroize::Zeroize;

type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Length of the negotiated shared secret in bytes.
pub const SHARED_SECRET_LEN: usize = 16;

/// A verified 128-bit shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SHARED_SECRET_LEN]);

impl SharedSecret {
    /// # Errors
    /// Returns `ProtocolError::InvalidSharedSecret` unless `bytes` is exactly 16 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        <[u8; SHARED_SECRET_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidSharedSecret(bytes.len()))
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Encrypting half of a CFB8 keystream.
pub struct StreamEncryptor(Aes128Cfb8Enc);

impl StreamEncryptor {
    pub fn new(secret: &SharedSecret) -> Result<Self> {
        Aes128Cfb8Enc::new_from_slices(&secret.0, &secret.0)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidSharedSecret(SHARED_SECRET_LEN))
    }

    /// Encrypts `data` in place, advancing the keystream.
    pub fn apply(&mut self, data: &mut [u8]) {
        let (blocks, _) = InOutBuf::from(data).into_chunks();
        self.0.encrypt_blocks_inout_mut(blocks);
    }
}

/// Decrypting half of a CFB8 keystream.
pub struct StreamDecryptor(Aes128Cfb8Dec);

impl StreamDecryptor {
    pub fn new(secret: &SharedSecret) -> Result<Self> {
        Aes128Cfb8Dec::new_from_slices(&secret.0, &secret.0)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidSharedSecret(SHARED_SECRET_LEN))
    }

    /// Decrypts `data` in place, advancing the keystream.
    pub fn apply(&mut self, data: &mut [u8]) {
        let (blocks, _) = InOutBuf::from(data).into_chunks();
        self.0.decrypt_blocks_inout_mut(blocks);
    }
}

impl fmt::Debug for StreamEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamEncryptor")
    }
}

impl fmt::Debug for StreamDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamDecryptor")
    }
}

/// Encrypts a standalone message with a fresh keystream for `secret`.
pub fn seal(secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut out = plaintext.to_vec();
    StreamEncryptor::new(secret)?.apply(&mut out);
    Ok(out)
}

/// Picks the first candidate whose keystream turns `sealed_token` back into
/// `verify_token`.
///
/// Candidates that are not exactly 16 bytes long are skipped. An empty
/// verify token never matches.
pub fn select_candidate(
    candidates: &[Vec<u8>],
    sealed_token: &[u8],
    verify_token: &[u8],
) -> Option<SharedSecret> {
    if verify_token.is_empty() || sealed_token.len() != verify_token.len() {
        return None;
    }

    candidates.iter().find_map(|candidate| {
        let secret = SharedSecret::from_slice(candidate).ok()?;
        let mut decryptor = StreamDecryptor::new(&secret).ok()?;
        let mut token = sealed_token.to_vec();
        decryptor.apply(&mut token);
        (token == verify_token).then_some(secret)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn secret(byte: u8) -> SharedSecret {
        SharedSecret::from_slice(&[byte; SHARED_SECRET_LEN]).unwrap()
    }

    #[test]
    fn test_keystream_continues_across_calls() {
        let key = secret(3);
        let message = b"split across two writes".to_vec();

        let mut whole = message.clone();
        StreamEncryptor::new(&key).unwrap().apply(&mut whole);

        let mut parts = message.clone();
        let mut enc = StreamEncryptor::new(&key).unwrap();
        let (head, tail) = parts.split_at_mut(5);
        enc.apply(head);
        enc.apply(tail);
        assert_eq!(whole, parts);

        let mut dec = StreamDecryptor::new(&key).unwrap();
        dec.apply(&mut parts);
        assert_eq!(parts, message);
    }

    #[test]
    fn test_select_candidate_picks_matching_key() {
        let token = [9u8, 8, 7, 6];
        let right = secret(0x42);
        let sealed = seal(&right, &token).unwrap();

        let candidates = vec![
            vec![1u8; 5],
            secret(0x11).as_bytes().to_vec(),
            right.as_bytes().to_vec(),
        ];
        assert_eq!(select_candidate(&candidates, &sealed, &token), Some(right));
    }

    #[test]
    fn test_select_candidate_without_match() {
        let token = [1u8, 2, 3, 4];
        let sealed = seal(&secret(0x42), &token).unwrap();
        let candidates = vec![secret(0x43).as_bytes().to_vec()];
        assert!(select_candidate(&candidates, &sealed, &token).is_none());
        assert!(select_candidate(&[], &sealed, &token).is_none());
        assert!(select_candidate(&candidates, &[], &[]).is_none());
    }

    #[test]
    fn test_wrong_secret_length_rejected() {
        assert!(matches!(
            SharedSecret::from_slice(&[0u8; 15]),
            Err(ProtocolError::InvalidSharedSecret(15))
        ));
    }
}
