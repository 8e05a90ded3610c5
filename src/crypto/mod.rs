//! Cipher registry and key handling

pub mod aead;
pub mod kdf;
pub mod stream;

pub use aead::{increment_nonce, AeadCipher};
pub use kdf::{derive_subkey, kdf};
pub use stream::StreamCrypter;

use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Cipher suite identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    // AEAD
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
    // Legacy stream (no authentication)
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Chacha20Ietf,
    // Pass-through, for testing only
    Dummy,
}

/// All supported suites, in registry order.
pub const ALL_CIPHERS: &[CipherKind] = &[
    CipherKind::Aes128Gcm,
    CipherKind::Aes192Gcm,
    CipherKind::Aes256Gcm,
    CipherKind::ChaCha20Poly1305,
    CipherKind::Aes128Ctr,
    CipherKind::Aes192Ctr,
    CipherKind::Aes256Ctr,
    CipherKind::Aes128Cfb,
    CipherKind::Aes192Cfb,
    CipherKind::Aes256Cfb,
    CipherKind::Chacha20Ietf,
];

impl CipherKind {
    pub fn key_size(&self) -> usize {
        match self {
            CipherKind::Aes128Gcm | CipherKind::Aes128Ctr | CipherKind::Aes128Cfb => 16,
            CipherKind::Aes192Gcm | CipherKind::Aes192Ctr | CipherKind::Aes192Cfb => 24,
            CipherKind::Aes256Gcm
            | CipherKind::ChaCha20Poly1305
            | CipherKind::Aes256Ctr
            | CipherKind::Aes256Cfb
            | CipherKind::Chacha20Ietf => 32,
            CipherKind::Dummy => 0,
        }
    }

    /// AEAD session salt length equals the key length.
    pub fn salt_size(&self) -> usize {
        self.key_size()
    }

    pub fn tag_size(&self) -> usize {
        16
    }

    pub fn nonce_size(&self) -> usize {
        12
    }

    /// IV length for the legacy stream suites (AES block or ChaCha nonce).
    pub fn iv_size(&self) -> usize {
        match self {
            CipherKind::Aes128Ctr
            | CipherKind::Aes192Ctr
            | CipherKind::Aes256Ctr
            | CipherKind::Aes128Cfb
            | CipherKind::Aes192Cfb
            | CipherKind::Aes256Cfb => 16,
            CipherKind::Chacha20Ietf => 12,
            _ => 0,
        }
    }

    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            CipherKind::Aes128Gcm
                | CipherKind::Aes192Gcm
                | CipherKind::Aes256Gcm
                | CipherKind::ChaCha20Poly1305
        )
    }

    pub fn is_stream(&self) -> bool {
        !self.is_aead() && *self != CipherKind::Dummy
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::Aes128Gcm => "aes-128-gcm",
            CipherKind::Aes192Gcm => "aes-192-gcm",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::ChaCha20Poly1305 => "chacha20-ietf-poly1305",
            CipherKind::Aes128Ctr => "aes-128-ctr",
            CipherKind::Aes192Ctr => "aes-192-ctr",
            CipherKind::Aes256Ctr => "aes-256-ctr",
            CipherKind::Aes128Cfb => "aes-128-cfb",
            CipherKind::Aes192Cfb => "aes-192-cfb",
            CipherKind::Aes256Cfb => "aes-256-cfb",
            CipherKind::Chacha20Ietf => "chacha20-ietf",
            CipherKind::Dummy => "dummy",
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<&str> for CipherKind {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            "aes-192-gcm" => Ok(CipherKind::Aes192Gcm),
            "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "chacha20-ietf-poly1305" | "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            "aes-128-ctr" => Ok(CipherKind::Aes128Ctr),
            "aes-192-ctr" => Ok(CipherKind::Aes192Ctr),
            "aes-256-ctr" => Ok(CipherKind::Aes256Ctr),
            "aes-128-cfb" => Ok(CipherKind::Aes128Cfb),
            "aes-192-cfb" => Ok(CipherKind::Aes192Cfb),
            "aes-256-cfb" => Ok(CipherKind::Aes256Cfb),
            "chacha20-ietf" => Ok(CipherKind::Chacha20Ietf),
            "dummy" => Ok(CipherKind::Dummy),
            _ => Err(Error::CipherNotSupported(s.to_string())),
        }
    }
}

/// A sorted list of supported cipher names.
pub fn list_ciphers() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = ALL_CIPHERS.iter().map(|k| k.name()).collect();
    names.sort_unstable();
    names
}

/// A configured cipher: suite plus master key, shared across sessions.
#[derive(Debug)]
pub struct Cipher {
    kind: CipherKind,
    key: Vec<u8>,
    replay: Option<Arc<crate::shadow::SaltFilter>>,
}

impl Cipher {
    /// Build a cipher from its name. The key is taken verbatim when given,
    /// otherwise derived from the password.
    pub fn pick(name: &str, key: &[u8], password: &str) -> Result<Cipher> {
        let kind = CipherKind::try_from(name)?;
        if kind == CipherKind::Dummy {
            return Ok(Cipher {
                kind,
                key: Vec::new(),
                replay: None,
            });
        }

        let key = if key.is_empty() {
            kdf(password, kind.key_size())
        } else {
            key.to_vec()
        };
        if key.len() != kind.key_size() {
            return Err(Error::KeySize(kind.key_size()));
        }

        Ok(Cipher {
            kind,
            key,
            replay: None,
        })
    }

    /// Attach a bloom-ring salt filter; inbound AEAD sessions and datagrams
    /// whose salt was recently seen are rejected as replays.
    pub fn with_replay_filter(mut self) -> Self {
        if self.kind.is_aead() {
            self.replay = Some(Arc::new(crate::shadow::SaltFilter::default()));
        }
        self
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn replay_filter(&self) -> Option<&Arc<crate::shadow::SaltFilter>> {
        self.replay.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_lookup_case_insensitive() {
        assert_eq!(
            CipherKind::try_from("AES-256-GCM").unwrap(),
            CipherKind::Aes256Gcm
        );
        assert_eq!(
            CipherKind::try_from("ChaCha20-IETF-Poly1305").unwrap(),
            CipherKind::ChaCha20Poly1305
        );
    }

    #[test]
    fn test_kind_lookup_unknown() {
        assert!(matches!(
            CipherKind::try_from("rc4-md5"),
            Err(Error::CipherNotSupported(_))
        ));
    }

    #[test]
    fn test_pick_derives_key_from_password() {
        let c = Cipher::pick("aes-128-gcm", &[], "foo").unwrap();
        assert_eq!(c.key(), kdf("foo", 16).as_slice());
    }

    #[test]
    fn test_pick_key_size_mismatch() {
        let err = Cipher::pick("aes-256-gcm", &[0u8; 16], "").unwrap_err();
        assert!(matches!(err, Error::KeySize(32)));
    }

    #[test]
    fn test_pick_accepts_exact_key() {
        let key = [0x11u8; 32];
        let c = Cipher::pick("chacha20-ietf-poly1305", &key, "ignored").unwrap();
        assert_eq!(c.key(), &key);
    }

    #[test]
    fn test_list_ciphers_sorted() {
        let names = list_ciphers();
        assert!(names.contains(&"aes-128-gcm"));
        assert!(names.contains(&"chacha20-ietf"));
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(CipherKind::Aes192Gcm.key_size(), 24);
        assert_eq!(CipherKind::ChaCha20Poly1305.salt_size(), 32);
        assert_eq!(CipherKind::Aes128Cfb.iv_size(), 16);
        assert_eq!(CipherKind::Chacha20Ietf.iv_size(), 12);
    }
}
