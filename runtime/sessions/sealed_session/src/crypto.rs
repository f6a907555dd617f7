//! Encryption and authentication of the session id carried by the session cookie.
//!
//! # Wire format
//!
//! An encoded session id has three dot-separated segments, each one lowercase hex:
//!
//! ```text
//! <iv>.<ciphertext>.<hmac>
//! ```
//!
//! - `iv` is 16 random bytes, generated fresh for every encoding.
//! - `ciphertext` is the AES-128-CBC encryption of the session id, zero-padded
//!   to a multiple of the block size.
//! - `hmac` is HMAC-SHA256 over the ciphertext bytes.
//!
//! The signature is always verified before attempting to decrypt.
//!
//! # Key derivation
//!
//! Both keys are derived from the same secret using PBKDF2-HMAC-SHA256.
//! The salts are fixed (and distinct from each other), so any process configured
//! with the same secret can decode cookies encoded by any other, across restarts.
use aes::Aes128;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use errors::{DecodeError, EncodeError};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::SessionId;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size, in bytes. It's also the length of the IV.
const BLOCK_SIZE: usize = 16;
/// AES-128 key size, in bytes.
const KEY_LEN: usize = 16;
const KDF_ROUNDS: u32 = 2;
/// Length of the plaintext before padding.
const PLAINTEXT_LEN: usize = SessionId::ENCODED_LEN;

// Version 1 of the salt scheme.
// Changing either salt invalidates every cookie issued so far.
const ENCRYPTION_KEY_SALT: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
const SIGNATURE_KEY_SALT: [u8; 16] = [15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0];

/// The keys derived from a session secret.
pub struct DerivedKeys {
    /// Key for AES-128 encryption.
    pub encryption: [u8; KEY_LEN],
    /// Key for HMAC-SHA256 signatures.
    pub signature: [u8; KEY_LEN],
}

/// Derive the encryption key and the signature key from a shared secret.
///
/// The derivation is deterministic: the same secret always yields the same keys.
pub fn derive_keys(secret: &SecretString) -> DerivedKeys {
    let secret = secret.expose_secret().as_bytes();
    let mut encryption = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, &ENCRYPTION_KEY_SALT, KDF_ROUNDS, &mut encryption);
    let mut signature = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, &SIGNATURE_KEY_SALT, KDF_ROUNDS, &mut signature);
    DerivedKeys {
        encryption,
        signature,
    }
}

#[derive(Clone)]
/// Encrypts and signs session ids into cookie values, and back.
///
/// Construct it once per secret and reuse it: derivation isn't free,
/// even if it's deterministic.
pub struct CookieCrypto {
    encryption_key: [u8; KEY_LEN],
    signer: HmacSha256,
}

impl std::fmt::Debug for CookieCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCrypto").finish_non_exhaustive()
    }
}

impl CookieCrypto {
    /// Derive the cookie keys from `secret`.
    pub fn new(secret: &SecretString) -> Self {
        Self::from_keys(derive_keys(secret))
    }

    /// Build a [`CookieCrypto`] instance from keys you derived yourself.
    pub fn from_keys(keys: DerivedKeys) -> Self {
        let signer = match <HmacSha256 as Mac>::new_from_slice(&keys.signature) {
            Ok(signer) => signer,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        };
        Self {
            encryption_key: keys.encryption,
            signer,
        }
    }

    /// Encrypt and sign a session id.
    pub fn encode_id(&self, id: &SessionId) -> Result<String, EncodeError> {
        self.encode(&id.to_string())
    }

    /// Verify and decrypt a session id.
    pub fn decode_id(&self, value: &str) -> Result<SessionId, DecodeError> {
        let plaintext = self.decode(value)?;
        SessionId::parse(&plaintext).map_err(|_| DecodeError::InvalidSessionId)
    }

    /// Encrypt and sign `plaintext`, returning `iv.ciphertext.hmac`.
    ///
    /// `plaintext` must be exactly as long as a session id.
    pub fn encode(&self, plaintext: &str) -> Result<String, EncodeError> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::rngs::OsRng
            .try_fill_bytes(&mut iv)
            .map_err(EncodeError::Randomness)?;
        self.encode_with_iv(plaintext, iv)
    }

    fn encode_with_iv(&self, plaintext: &str, iv: [u8; BLOCK_SIZE]) -> Result<String, EncodeError> {
        let plaintext = plaintext.as_bytes();
        if plaintext.len() != PLAINTEXT_LEN {
            return Err(EncodeError::UnexpectedLength {
                actual: plaintext.len(),
            });
        }
        // Zero padding up to the next block boundary.
        let padded_len = plaintext.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);

        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buffer, padded_len)
            .map_err(|_| EncodeError::Encryption)?;

        let mut mac = self.signer.clone();
        mac.update(ciphertext);
        let tag = mac.finalize().into_bytes();

        Ok(format!(
            "{}.{}.{}",
            hex::encode(iv),
            hex::encode(ciphertext),
            hex::encode(tag)
        ))
    }

    /// Verify the signature of `value` and decrypt it.
    pub fn decode(&self, value: &str) -> Result<String, DecodeError> {
        let segments: Vec<&str> = value.split('.').collect();
        let [iv, ciphertext, tag] = segments.as_slice() else {
            return Err(DecodeError::SegmentCount {
                found: segments.len(),
            });
        };
        let iv = hex::decode(iv)?;
        let mut ciphertext = hex::decode(ciphertext)?;
        let tag = hex::decode(tag)?;

        let iv: [u8; BLOCK_SIZE] = iv
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidIvLength { found: iv.len() })?;

        // Authenticate first. Unauthenticated ciphertext never reaches the cipher.
        let mut mac = self.signer.clone();
        mac.update(&ciphertext);
        mac.verify_slice(&tag)
            .map_err(|_| DecodeError::SignatureMismatch)?;

        let plaintext = Aes128CbcDec::new(&self.encryption_key.into(), &iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut ciphertext)
            .map_err(|_| DecodeError::Decryption)?;
        let Some(plaintext) = plaintext.get(..PLAINTEXT_LEN) else {
            return Err(DecodeError::TooShort {
                found: plaintext.len(),
            });
        };
        String::from_utf8(plaintext.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// Errors that can occur when encoding or decoding a session cookie value.
pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`CookieCrypto::encode`](super::CookieCrypto::encode).
    pub enum EncodeError {
        #[error("Failed to generate a random initialization vector")]
        Randomness(#[source] rand::Error),
        #[error("Expected a {}-byte plaintext, got {actual} bytes", super::PLAINTEXT_LEN)]
        UnexpectedLength { actual: usize },
        #[error("Failed to encrypt the session id")]
        Encryption,
    }

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`CookieCrypto::decode`](super::CookieCrypto::decode).
    pub enum DecodeError {
        #[error("Expected 3 dot-separated segments, found {found}")]
        SegmentCount { found: usize },
        #[error("One of the segments is not valid hex")]
        InvalidHex(#[from] hex::FromHexError),
        #[error("Expected a 16-byte initialization vector, found {found} bytes")]
        InvalidIvLength { found: usize },
        #[error("The signature doesn't match the ciphertext")]
        SignatureMismatch,
        #[error("Failed to decrypt the ciphertext")]
        Decryption,
        #[error("The decrypted value is too short ({found} bytes)")]
        TooShort { found: usize },
        #[error("The decrypted value is not valid UTF-8")]
        InvalidUtf8,
        #[error("The decrypted value is not a valid session id")]
        InvalidSessionId,
    }
}
