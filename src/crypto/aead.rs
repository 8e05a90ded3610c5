//! AEAD primitives

use super::CipherKind;
use crate::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::AesGcm;
use chacha20poly1305::ChaCha20Poly1305;

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

/// A session AEAD instance, constructed once from the HKDF subkey.
pub enum AeadCipher {
    Aes128Gcm(Box<Aes128Gcm>),
    Aes192Gcm(Box<Aes192Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl AeadCipher {
    pub fn new(kind: CipherKind, subkey: &[u8]) -> Result<Self> {
        let bad_key = || Error::KeySize(kind.key_size());
        match kind {
            CipherKind::Aes128Gcm => Ok(AeadCipher::Aes128Gcm(Box::new(
                Aes128Gcm::new_from_slice(subkey).map_err(|_| bad_key())?,
            ))),
            CipherKind::Aes192Gcm => Ok(AeadCipher::Aes192Gcm(Box::new(
                Aes192Gcm::new_from_slice(subkey).map_err(|_| bad_key())?,
            ))),
            CipherKind::Aes256Gcm => Ok(AeadCipher::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(subkey).map_err(|_| bad_key())?,
            ))),
            CipherKind::ChaCha20Poly1305 => Ok(AeadCipher::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(subkey).map_err(|_| bad_key())?,
            ))),
            _ => Err(Error::CipherNotSupported(format!("{} is not AEAD", kind))),
        }
    }

    /// Encrypt `plaintext`, returning ciphertext with the tag appended.
    pub fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = GenericArray::from_slice(nonce);
        let out = match self {
            AeadCipher::Aes128Gcm(c) => c.encrypt(nonce, plaintext),
            AeadCipher::Aes192Gcm(c) => c.encrypt(nonce, plaintext),
            AeadCipher::Aes256Gcm(c) => c.encrypt(nonce, plaintext),
            AeadCipher::ChaCha20Poly1305(c) => c.encrypt(nonce, plaintext),
        };
        out.map_err(|_| Error::auth("AEAD seal failed"))
    }

    /// Decrypt and authenticate `ciphertext` (payload followed by tag).
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = GenericArray::from_slice(nonce);
        let out = match self {
            AeadCipher::Aes128Gcm(c) => c.decrypt(nonce, ciphertext),
            AeadCipher::Aes192Gcm(c) => c.decrypt(nonce, ciphertext),
            AeadCipher::Aes256Gcm(c) => c.decrypt(nonce, ciphertext),
            AeadCipher::ChaCha20Poly1305(c) => c.decrypt(nonce, ciphertext),
        };
        out.map_err(|_| Error::auth("AEAD open failed"))
    }
}

/// Increment a little-endian unsigned integer, wrapping on overflow.
pub fn increment_nonce(nonce: &mut [u8]) {
    for byte in nonce.iter_mut() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_nonce() {
        let mut nonce = [0u8; 12];
        increment_nonce(&mut nonce);
        assert_eq!(nonce[0], 1);

        let mut nonce = [0xFFu8, 0x00, 0x00];
        increment_nonce(&mut nonce);
        assert_eq!(nonce, [0x00, 0x01, 0x00]);

        let mut nonce = [0xFFu8; 3];
        increment_nonce(&mut nonce);
        assert_eq!(nonce, [0x00; 3]);
    }

    #[test]
    fn test_seal_open_round_trip() {
        for kind in [
            CipherKind::Aes128Gcm,
            CipherKind::Aes192Gcm,
            CipherKind::Aes256Gcm,
            CipherKind::ChaCha20Poly1305,
        ] {
            let key = vec![7u8; kind.key_size()];
            let cipher = AeadCipher::new(kind, &key).unwrap();
            let nonce = [0u8; 12];

            let ct = cipher.seal(&nonce, b"hello").unwrap();
            assert_eq!(ct.len(), 5 + kind.tag_size());
            assert_eq!(cipher.open(&nonce, &ct).unwrap(), b"hello");
        }
    }

    #[test]
    fn test_open_rejects_tamper() {
        let kind = CipherKind::ChaCha20Poly1305;
        let cipher = AeadCipher::new(kind, &[7u8; 32]).unwrap();
        let nonce = [0u8; 12];
        let mut ct = cipher.seal(&nonce, b"hello").unwrap();
        ct[0] ^= 0x01;
        assert!(cipher.open(&nonce, &ct).is_err());
    }

    #[test]
    fn test_open_rejects_wrong_nonce() {
        let cipher = AeadCipher::new(CipherKind::Aes256Gcm, &[7u8; 32]).unwrap();
        let ct = cipher.seal(&[0u8; 12], b"hello").unwrap();
        let mut other = [0u8; 12];
        increment_nonce(&mut other);
        assert!(cipher.open(&other, &ct).is_err());
    }
}
