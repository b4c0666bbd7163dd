//! Envelope encryption for the password vault.
//!
//! This module turns a passphrase plus arbitrary JSON-serializable data into
//! an envelope safe to store at an untrusted-at-rest location, and reverses
//! that transform given the same passphrase:
//! - Key derivation: PBKDF2-HMAC-SHA256 with a tunable work factor
//! - Authenticated encryption: AES-256-GCM
//! - Fresh random salt and nonce on every encrypt call
//!
//! The codec treats the plaintext as one opaque JSON value; it has no
//! knowledge of vault entry structure. Nothing in this module logs key
//! material or plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{HavenError, HavenResult};

/// Salt length in bytes
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;
/// Derived key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// Default PBKDF2 iteration count. Deliberately expensive: the passphrase is
/// the only secret protecting the vault, so the work factor is the entire
/// defense against offline brute force.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Lowest iteration count the codec will accept
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// The bundle stored at rest: ciphertext plus the public parameters needed
/// to decrypt it again.
///
/// All three fields are safe to store in plaintext alongside each other;
/// security rests on the passphrase and on salt/nonce uniqueness, never on
/// their secrecy. A new envelope fully replaces the previous one in storage;
/// envelopes are never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// AES-256-GCM ciphertext with the integrity tag appended
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Nonce used for this encryption, unique per call
    #[serde(with = "base64_array")]
    pub iv: [u8; NONCE_LEN],
    /// Salt the key was derived with, unique per call
    #[serde(with = "base64_array")]
    pub salt: [u8; SALT_LEN],
}

/// Stateless encrypt/decrypt of the vault payload.
///
/// The iteration count is fixed at construction and must match the count the
/// envelope was produced with; it is not recorded in the envelope. Changing
/// the work factor therefore requires decrypting with the old codec and
/// re-encrypting with the new one.
#[derive(Debug, Clone)]
pub struct VaultCodec {
    iterations: u32,
}

impl Default for VaultCodec {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl VaultCodec {
    /// Create a codec with the default work factor
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom work factor.
    ///
    /// Counts below [`MIN_KDF_ITERATIONS`] are rejected.
    pub fn with_iterations(iterations: u32) -> HavenResult<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(HavenError::validation(
                "kdf_iterations",
                format!("must be at least {}", MIN_KDF_ITERATIONS),
            ));
        }
        Ok(Self { iterations })
    }

    /// Get the configured iteration count
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Stretch the passphrase into a 256-bit AEAD key.
    ///
    /// The derived key lives only on the stack of the encrypt/decrypt call;
    /// it is never persisted or logged.
    fn derive_key(&self, passphrase: &str, salt: &[u8; SALT_LEN]) -> HavenResult<[u8; KEY_LEN]> {
        if passphrase.is_empty() {
            return Err(HavenError::validation("passphrase", "must not be empty"));
        }
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, self.iterations, &mut key);
        Ok(key)
    }

    /// Encrypt a JSON-serializable value under the passphrase.
    ///
    /// Generates a fresh random salt and nonce for this call; reusing a
    /// (key, nonce) pair would break both confidentiality and integrity of
    /// the AEAD, so envelopes are never produced from recycled parameters.
    pub fn encrypt<T: Serialize>(
        &self,
        value: &T,
        passphrase: &str,
    ) -> HavenResult<EncryptedEnvelope> {
        let plaintext = serde_json::to_vec(value)?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);

        let key = self.derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
            .map_err(|_| HavenError::VaultSealFailed)?;

        Ok(EncryptedEnvelope {
            ciphertext,
            iv,
            salt,
        })
    }

    /// Decrypt an envelope back to the original value.
    ///
    /// Every failure mode (wrong passphrase, tampered or truncated
    /// ciphertext, malformed plaintext JSON) collapses into the single
    /// opaque [`HavenError::VaultUnlockFailed`]; the AEAD tag check is the
    /// only signal and callers get nothing more specific.
    pub fn decrypt<T: DeserializeOwned>(
        &self,
        envelope: &EncryptedEnvelope,
        passphrase: &str,
    ) -> HavenResult<T> {
        let key = self
            .derive_key(passphrase, &envelope.salt)
            .map_err(|_| HavenError::VaultUnlockFailed)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope.iv),
                envelope.ciphertext.as_ref(),
            )
            .map_err(|_| HavenError::VaultUnlockFailed)?;
        serde_json::from_slice(&plaintext).map_err(|_| HavenError::VaultUnlockFailed)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_array {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::base64_bytes::serialize(bytes, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let bytes = super::base64_bytes::deserialize(deserializer)?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            serde::de::Error::custom(format!("expected {} bytes, got {}", N, len))
        })
    }
}
