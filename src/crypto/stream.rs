//! Legacy stream-cipher primitives
//!
//! These keystream modes carry no authentication and exist for
//! interoperability with pre-AEAD Shadowsocks deployments only.

use super::CipherKind;
use crate::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{BufDecryptor, BufEncryptor};
use chacha20::ChaCha20;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

/// A directional keystream: XORs data in place.
pub enum StreamCrypter {
    Aes128Ctr(Box<Ctr128BE<Aes128>>),
    Aes192Ctr(Box<Ctr128BE<Aes192>>),
    Aes256Ctr(Box<Ctr128BE<Aes256>>),
    Aes128CfbEnc(Box<BufEncryptor<Aes128>>),
    Aes192CfbEnc(Box<BufEncryptor<Aes192>>),
    Aes256CfbEnc(Box<BufEncryptor<Aes256>>),
    Aes128CfbDec(Box<BufDecryptor<Aes128>>),
    Aes192CfbDec(Box<BufDecryptor<Aes192>>),
    Aes256CfbDec(Box<BufDecryptor<Aes256>>),
    ChaCha20(Box<ChaCha20>),
}

impl StreamCrypter {
    /// Transform `data` in place with the next keystream bytes.
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            StreamCrypter::Aes128Ctr(c) => c.apply_keystream(data),
            StreamCrypter::Aes192Ctr(c) => c.apply_keystream(data),
            StreamCrypter::Aes256Ctr(c) => c.apply_keystream(data),
            StreamCrypter::Aes128CfbEnc(c) => c.encrypt(data),
            StreamCrypter::Aes192CfbEnc(c) => c.encrypt(data),
            StreamCrypter::Aes256CfbEnc(c) => c.encrypt(data),
            StreamCrypter::Aes128CfbDec(c) => c.decrypt(data),
            StreamCrypter::Aes192CfbDec(c) => c.decrypt(data),
            StreamCrypter::Aes256CfbDec(c) => c.decrypt(data),
            StreamCrypter::ChaCha20(c) => c.apply_keystream(data),
        }
    }
}

fn bad_key(kind: CipherKind) -> Error {
    Error::KeySize(kind.key_size())
}

/// Build the encrypting keystream for `kind` with the given IV.
pub fn encrypter(kind: CipherKind, key: &[u8], iv: &[u8]) -> Result<StreamCrypter> {
    let e = || bad_key(kind);
    Ok(match kind {
        CipherKind::Aes128Ctr => {
            StreamCrypter::Aes128Ctr(Box::new(Ctr128BE::new_from_slices(key, iv).map_err(|_| e())?))
        }
        CipherKind::Aes192Ctr => {
            StreamCrypter::Aes192Ctr(Box::new(Ctr128BE::new_from_slices(key, iv).map_err(|_| e())?))
        }
        CipherKind::Aes256Ctr => {
            StreamCrypter::Aes256Ctr(Box::new(Ctr128BE::new_from_slices(key, iv).map_err(|_| e())?))
        }
        CipherKind::Aes128Cfb => StreamCrypter::Aes128CfbEnc(Box::new(
            BufEncryptor::new_from_slices(key, iv).map_err(|_| e())?,
        )),
        CipherKind::Aes192Cfb => StreamCrypter::Aes192CfbEnc(Box::new(
            BufEncryptor::new_from_slices(key, iv).map_err(|_| e())?,
        )),
        CipherKind::Aes256Cfb => StreamCrypter::Aes256CfbEnc(Box::new(
            BufEncryptor::new_from_slices(key, iv).map_err(|_| e())?,
        )),
        CipherKind::Chacha20Ietf => {
            StreamCrypter::ChaCha20(Box::new(ChaCha20::new_from_slices(key, iv).map_err(|_| e())?))
        }
        _ => {
            return Err(Error::CipherNotSupported(format!(
                "{} is not a stream cipher",
                kind
            )))
        }
    })
}

/// Build the decrypting keystream for `kind` with the given IV. CTR and
/// ChaCha20 are their own inverse; CFB needs the distinct decrypt direction.
pub fn decrypter(kind: CipherKind, key: &[u8], iv: &[u8]) -> Result<StreamCrypter> {
    let e = || bad_key(kind);
    Ok(match kind {
        CipherKind::Aes128Cfb => StreamCrypter::Aes128CfbDec(Box::new(
            BufDecryptor::new_from_slices(key, iv).map_err(|_| e())?,
        )),
        CipherKind::Aes192Cfb => StreamCrypter::Aes192CfbDec(Box::new(
            BufDecryptor::new_from_slices(key, iv).map_err(|_| e())?,
        )),
        CipherKind::Aes256Cfb => StreamCrypter::Aes256CfbDec(Box::new(
            BufDecryptor::new_from_slices(key, iv).map_err(|_| e())?,
        )),
        _ => encrypter(kind, key, iv)?,
    })
}
