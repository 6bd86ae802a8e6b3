//! Field encryption for discovery messages.
//!
//! Each string field is XORed with an AES-256-CFB keystream and then tagged
//! with its length (see [`framing`]). Key material is always supplied by the
//! caller; nothing secret is compiled into the crate.

pub mod framing;

use std::fmt;

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CryptoError, DiscoveryError};

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

const KDF_SALT: &[u8] = b"disco-field-cipher-v1";
const KDF_INFO: &[u8] = b"aes-256-cfb key+iv";

/// Symmetric key and IV shared by every participant.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey {
    key: [u8; 32],
    iv: [u8; 16],
}

impl CipherKey {
    pub fn new(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Derives key and IV from a shared secret with HKDF-SHA256.
    pub fn derive(secret: &[u8]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::KeyDerivation("shared secret is empty".into()));
        }
        let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), secret);
        let mut okm = [0u8; 48];
        hk.expand(KDF_INFO, &mut okm)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&okm[..32]);
        iv.copy_from_slice(&okm[32..]);
        Ok(Self { key, iv })
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKey").finish_non_exhaustive()
    }
}

/// AES-256-CFB over short byte strings; output length equals input length.
#[derive(Debug, Clone)]
pub struct StreamCipher {
    key: CipherKey,
}

impl StreamCipher {
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }

    pub fn encode(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        Aes256CfbEnc::new(&self.key.key.into(), &self.key.iv.into()).encrypt(&mut buf);
        buf
    }

    /// Decrypts `ciphertext`, which must be exactly `expected_len` bytes.
    pub fn decode(&self, ciphertext: &[u8], expected_len: usize) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() != expected_len {
            return Err(CryptoError::LengthMismatch {
                expected: expected_len,
                actual: ciphertext.len(),
            });
        }
        let mut buf = ciphertext.to_vec();
        Aes256CfbDec::new(&self.key.key.into(), &self.key.iv.into()).decrypt(&mut buf);
        Ok(buf)
    }

    /// Decrypts a field carrying an inline length marker.
    pub fn decode_framed(&self, framed: &[u8]) -> Result<Vec<u8>, DiscoveryError> {
        let marker = framing::find_length(framed)?;
        let length = framing::parse_length(marker)?;
        let ciphertext = framing::strip_marker(framed, marker);
        Ok(self.decode(&ciphertext, length)?)
    }
}

/// How an encrypted field records its own length on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Two-byte big-endian length ahead of the ciphertext.
    #[default]
    LengthPrefix,
    /// Legacy `//<len>//` marker spliced into the ciphertext midpoint.
    InlineMarker,
}

/// Seals and opens individual message fields.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    cipher: StreamCipher,
    framing: Framing,
}

impl FieldCodec {
    pub fn new(key: CipherKey) -> Self {
        Self {
            cipher: StreamCipher::new(key),
            framing: Framing::default(),
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn cipher(&self) -> &StreamCipher {
        &self.cipher
    }

    /// Encrypts `plaintext` and tags it with its length.
    pub fn seal(&self, plaintext: &str) -> Result<Vec<u8>, DiscoveryError> {
        let ciphertext = self.cipher.encode(plaintext.as_bytes());
        match self.framing {
            Framing::LengthPrefix => Ok(framing::prefix_length(&ciphertext)?),
            Framing::InlineMarker => Ok(framing::hide_length(&ciphertext, plaintext.len())),
        }
    }

    /// Reverses [`seal`](Self::seal).
    pub fn open(&self, field: &[u8]) -> Result<String, DiscoveryError> {
        let plaintext = match self.framing {
            Framing::LengthPrefix => {
                let ciphertext = framing::split_prefix(field)?;
                self.cipher.decode(ciphertext, ciphertext.len())?
            }
            Framing::InlineMarker => self.cipher.decode_framed(field)?,
        };
        String::from_utf8(plaintext).map_err(|_| DiscoveryError::Crypto(CryptoError::InvalidUtf8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    fn test_key() -> CipherKey {
        CipherKey::derive(b"unit-test shared secret").unwrap()
    }

    #[test]
    fn encode_then_decode_restores_bytes() {
        let cipher = StreamCipher::new(test_key());
        let samples: [&[u8]; 4] = [b"", b"a", b"192.168.1.20", b"a rather long alias for some host"];
        for text in samples {
            let encoded = cipher.encode(text);
            assert_eq!(encoded.len(), text.len());
            assert_eq!(cipher.decode(&encoded, text.len()).unwrap(), text);
        }
    }

    #[test]
    fn matches_legacy_cfb_output() {
        let key: [u8; 32] = *b"IwTbLbY!0@9*7^JyTtPtWyPmPmDyPmMf";
        let iv: [u8; 16] = std::array::from_fn(|i| i as u8);
        let cipher = StreamCipher::new(CipherKey::new(key, iv));
        assert_eq!(cipher.encode(b"test"), [0x8b, 0x9c, 0xac, 0x7f]);
        assert_eq!(cipher.decode(&[0x8b, 0x9c, 0xac, 0x7f], 4).unwrap(), b"test");
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let cipher = StreamCipher::new(test_key());
        let encoded = cipher.encode(b"6666");
        assert_eq!(
            cipher.decode(&encoded, 3),
            Err(CryptoError::LengthMismatch {
                expected: 3,
                actual: 4
            })
        );
    }

    #[test]
    fn derived_keys_differ_per_secret() {
        let a = StreamCipher::new(CipherKey::derive(b"alpha").unwrap());
        let b = StreamCipher::new(CipherKey::derive(b"bravo").unwrap());
        assert_ne!(a.encode(b"10.0.0.5"), b.encode(b"10.0.0.5"));
        assert!(CipherKey::derive(b"").is_err());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let text = format!("{:?}", test_key());
        assert_eq!(text, "CipherKey { .. }");
    }

    #[test]
    fn seal_and_open_in_both_framings() {
        for framing in [Framing::LengthPrefix, Framing::InlineMarker] {
            let codec = FieldCodec::new(test_key()).with_framing(framing);
            let sealed = codec.seal("10.0.0.9").unwrap();
            assert_eq!(codec.open(&sealed).unwrap(), "10.0.0.9");
        }
    }

    #[test]
    fn inline_marker_layout_matches_legacy() {
        let codec = FieldCodec::new(test_key()).with_framing(Framing::InlineMarker);
        let sealed = codec.seal("6666").unwrap();
        let ciphertext = codec.cipher().encode(b"6666");
        assert_eq!(sealed, framing::hide_length(&ciphertext, 4));
    }

    #[test]
    fn unframed_field_fails_to_open() {
        let codec = FieldCodec::new(test_key()).with_framing(Framing::InlineMarker);
        assert!(matches!(
            codec.open(&[0x8b, 0x9c, 0xac, 0x7f]),
            Err(DiscoveryError::Frame(FrameError::MissingMarker))
        ));

        let codec = FieldCodec::new(test_key());
        assert!(matches!(
            codec.open(&[0]),
            Err(DiscoveryError::Frame(FrameError::MissingMarker))
        ));
        assert!(matches!(
            codec.open(&[0, 9, 1, 2]),
            Err(DiscoveryError::Frame(FrameError::Truncated { .. }))
        ));
    }
}
