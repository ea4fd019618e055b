//! Symmetric encryption for cached record bodies.
//!
//! Every write gets a fresh random IV (never reused across writes, even
//! for the same id); decryption is fail-closed, turning any tamper or key
//! mismatch into [`CacheError::StorageCorrupted`] rather than returning
//! partially-decoded bytes.

use aes::Aes256;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::{CacheError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// A symmetric cipher identifier accepted by `CacheInit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Aes256Cbc,
    Aes256Gcm,
}

impl Cipher {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "aes-256-cbc" => Ok(Self::Aes256Cbc),
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown cipher: {other}"
            ))),
        }
    }

    /// Byte length of the IV/nonce this cipher requires.
    pub fn iv_len(&self) -> usize {
        match self {
            Self::Aes256Cbc => 16,
            Self::Aes256Gcm => 12,
        }
    }
}

/// The result of encrypting a body: ciphertext plus the IV used, so the
/// caller can persist both on the [`crate::record::CacheRecord`].
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Encrypts `plaintext` under `key` with `cipher`, generating a fresh
/// random IV.
pub fn seal(cipher: Cipher, key: &[u8], plaintext: &[u8]) -> Result<Sealed> {
    let mut iv = vec![0u8; cipher.iv_len()];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = match cipher {
        Cipher::Aes256Cbc => {
            let key = pad_key(key);
            let enc = Aes256CbcEnc::new(key.as_slice().into(), iv.as_slice().into());
            enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
        }
        Cipher::Aes256Gcm => {
            let key = pad_key(key);
            let cipher = Aes256Gcm::new(key.as_slice().into());
            let nonce = Nonce::from_slice(&iv);
            cipher
                .encrypt(nonce, plaintext)
                .map_err(|_| CacheError::StorageCorrupted { id: "<seal>".to_owned() })?
        }
    };

    Ok(Sealed { ciphertext, iv })
}

/// Decrypts `ciphertext` under `key` with `cipher` and `iv`. Any failure
/// (wrong key, corrupted ciphertext, truncated IV) is reported as
/// [`CacheError::StorageCorrupted`] tagged with `record_id`, matching the
/// fail-closed eviction behavior the coordinator relies on.
pub fn open(
    cipher: Cipher,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    record_id: &str,
) -> Result<Vec<u8>> {
    let corrupted = || CacheError::StorageCorrupted {
        id: record_id.to_owned(),
    };

    match cipher {
        Cipher::Aes256Cbc => {
            let key = pad_key(key);
            let dec = Aes256CbcDec::new(key.as_slice().into(), iv.into());
            dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| corrupted())
        }
        Cipher::Aes256Gcm => {
            let key = pad_key(key);
            let cipher = Aes256Gcm::new(key.as_slice().into());
            let nonce = Nonce::from_slice(iv);
            cipher.decrypt(nonce, ciphertext).map_err(|_| corrupted())
        }
    }
}

/// Normalizes an arbitrary-length configured key to exactly 32 bytes.
/// Keys shorter than 32 bytes are zero-padded; longer keys are truncated.
/// `CacheInit` is expected to supply an already-correctly-sized key in
/// practice, but this keeps `seal`/`open` infallible on key length.
fn pad_key(key: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = key.len().min(32);
    out[..n].copy_from_slice(&key[..n]);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cbc_roundtrip() {
        let key = [7u8; 32];
        let sealed = seal(Cipher::Aes256Cbc, &key, b"hello world").unwrap();
        let opened = open(
            Cipher::Aes256Cbc,
            &key,
            &sealed.iv,
            &sealed.ciphertext,
            "rec1",
        )
        .unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn gcm_roundtrip() {
        let key = [9u8; 32];
        let sealed = seal(Cipher::Aes256Gcm, &key, b"hello world").unwrap();
        let opened = open(
            Cipher::Aes256Gcm,
            &key,
            &sealed.iv,
            &sealed.ciphertext,
            "rec1",
        )
        .unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn ivs_are_not_reused_across_writes() {
        let key = [1u8; 32];
        let a = seal(Cipher::Aes256Cbc, &key, b"same body").unwrap();
        let b = seal(Cipher::Aes256Cbc, &key, b"same body").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails_closed_not_silently() {
        let key = [1u8; 32];
        let wrong_key = [2u8; 32];
        let sealed = seal(Cipher::Aes256Gcm, &key, b"secret").unwrap();
        let result = open(Cipher::Aes256Gcm, &wrong_key, &sealed.iv, &sealed.ciphertext, "rec1");
        assert!(matches!(result, Err(CacheError::StorageCorrupted { .. })));
    }

    #[test]
    fn unknown_cipher_is_rejected() {
        assert!(Cipher::parse("rot13").is_err());
    }
}
