//! Authenticated symmetric encryption for chunk and manifest bytes.
//!
//! AES-256-GCM via `openssl`, following the same `Cipher`/`Crypter` pattern
//! the backup server uses for its own chunk encryption, but simplified to a
//! whole-buffer API since nothing here streams: callers already hold full
//! chunks or full manifest records in memory.

use openssl::symm::{Cipher, Crypter, Mode};

use crate::error::CoordinatorError;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A 256-bit symmetric key. Two encryptions of the same plaintext under the
/// same key differ, because a fresh IV is drawn for every call to `encrypt`.
#[derive(Clone)]
pub struct CryptoKey([u8; KEY_LEN]);

impl CryptoKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        CryptoKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        base64::encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, CoordinatorError> {
        let raw = base64::decode(s)
            .map_err(|err| anyhow::anyhow!("invalid base64 key: {err}"))?;
        let arr: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|_| anyhow::anyhow!("key must be {KEY_LEN} bytes"))?;
        Ok(CryptoKey(arr))
    }
}

/// Draws a fresh, uniformly random key.
pub fn generate_key() -> CryptoKey {
    let mut buf = [0u8; KEY_LEN];
    openssl::rand::rand_bytes(&mut buf).expect("openssl CSPRNG failure");
    CryptoKey(buf)
}

/// Encrypts `plaintext` under `key`. Output layout: `iv(12) || ciphertext || tag(16)`.
pub fn encrypt(plaintext: &[u8], key: &CryptoKey) -> Vec<u8> {
    let cipher = Cipher::aes_256_gcm();

    let mut iv = [0u8; IV_LEN];
    openssl::rand::rand_bytes(&mut iv).expect("openssl CSPRNG failure");

    let mut crypter =
        Crypter::new(cipher, Mode::Encrypt, &key.0, Some(&iv)).expect("crypter init failed");

    let mut ciphertext = vec![0u8; plaintext.len() + cipher.block_size()];
    let mut count = crypter
        .update(plaintext, &mut ciphertext)
        .expect("crypter update failed");
    count += crypter
        .finalize(&mut ciphertext[count..])
        .expect("crypter finalize failed");
    ciphertext.truncate(count);

    let mut tag = [0u8; TAG_LEN];
    crypter.get_tag(&mut tag).expect("crypter get_tag failed");

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len() + TAG_LEN);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    out
}

/// Decrypts a blob produced by `encrypt`. Fails with `AuthFailure` on any
/// tampering, truncation, or wrong key.
pub fn decrypt(blob: &[u8], key: &CryptoKey) -> Result<Vec<u8>, CoordinatorError> {
    if blob.len() < IV_LEN + TAG_LEN {
        return Err(CoordinatorError::AuthFailure);
    }

    let (iv, rest) = blob.split_at(IV_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    let cipher = Cipher::aes_256_gcm();
    let mut crypter =
        Crypter::new(cipher, Mode::Decrypt, &key.0, Some(iv)).map_err(|_| CoordinatorError::AuthFailure)?;
    crypter
        .set_tag(tag)
        .map_err(|_| CoordinatorError::AuthFailure)?;

    let mut plaintext = vec![0u8; ciphertext.len() + cipher.block_size()];
    let mut count = crypter
        .update(ciphertext, &mut plaintext)
        .map_err(|_| CoordinatorError::AuthFailure)?;
    count += crypter
        .finalize(&mut plaintext[count..])
        .map_err(|_| CoordinatorError::AuthFailure)?;
    plaintext.truncate(count);

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key();
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ciphertext = encrypt(plaintext, &key);
        let decoded = decrypt(&ciphertext, &key).unwrap();
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn encryptions_are_randomized() {
        let key = generate_key();
        let plaintext = b"same plaintext twice";
        let a = encrypt(plaintext, &key);
        let b = encrypt(plaintext, &key);
        assert_ne!(a, b);
    }

    #[test]
    fn tampering_is_detected() {
        let key = generate_key();
        let mut ciphertext = encrypt(b"hello world", &key);
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert!(decrypt(&ciphertext, &key).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let key_a = generate_key();
        let key_b = generate_key();
        let ciphertext = encrypt(b"hello world", &key_a);
        assert!(decrypt(&ciphertext, &key_b).is_err());
    }

    #[test]
    fn truncated_blob_fails() {
        let key = generate_key();
        let ciphertext = encrypt(b"hello world", &key);
        assert!(decrypt(&ciphertext[..4], &key).is_err());
    }

    #[test]
    fn key_base64_round_trip() {
        let key = generate_key();
        let encoded = key.to_base64();
        let decoded = CryptoKey::from_base64(&encoded).unwrap();
        assert_eq!(key.as_bytes(), decoded.as_bytes());
    }
}
