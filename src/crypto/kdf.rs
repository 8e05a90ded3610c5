//! Key derivation

use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;

/// Derive a master key from a password using iterated MD5 (EVP_BytesToKey,
/// compatible with original Shadowsocks).
pub fn kdf(password: &str, key_size: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_size);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_size {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password.as_bytes());
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_size);
    key
}

/// Derive the per-session subkey with HKDF-SHA1 (per Shadowsocks AEAD spec).
pub fn derive_subkey(key: &[u8], salt: &[u8]) -> Vec<u8> {
    let hk = Hkdf::<Sha1>::new(Some(salt), key);
    let mut subkey = vec![0u8; key.len()];
    hk.expand(b"ss-subkey", &mut subkey)
        .expect("subkey length is a valid HKDF output length");
    subkey
}
