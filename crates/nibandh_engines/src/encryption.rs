#![forbid(unsafe_code)]

use std::env;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use nibandh_contracts::record::{CapturedRecord, CipherText, SessionId};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SESSION_ID_LEN: usize = 16;

#[derive(Debug)]
pub enum CryptoError {
    InvalidKey,
    EncryptionFailed,
    DecryptionFailed,
    Json(serde_json::Error),
    Decode(base64::DecodeError),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "key must be {} hex chars", KEY_LEN * 2),
            Self::EncryptionFailed => write!(f, "encryption failed"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::Json(err) => write!(f, "payload serialization failed: {err}"),
            Self::Decode(err) => write!(f, "ciphertext decode failed: {err}"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<serde_json::Error> for CryptoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(value: base64::DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// 256-bit AES-GCM key, transported as 64 hex chars.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of debug output.
        write!(f, "SymmetricKey(..)")
    }
}

impl SymmetricKey {
    pub fn from_hex(raw: &str) -> Result<Self, CryptoError> {
        let raw = raw.trim();
        if raw.len() != KEY_LEN * 2 {
            return Err(CryptoError::InvalidKey);
        }
        let mut key = [0u8; KEY_LEN];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&raw[i * 2..i * 2 + 2], 16)
                .map_err(|_| CryptoError::InvalidKey)?;
        }
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }
}

/// AES-256-GCM with a fresh random nonce; output is base64(nonce || ct).
pub fn encrypt_payload(plaintext: &[u8], key: &SymmetricKey) -> Result<CipherText, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::EncryptionFailed)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(CipherText(BASE64.encode(combined)))
}

/// Strict inverse of `encrypt_payload`. A wrong key or corrupted input is
/// an error, never partial plaintext.
pub fn decrypt_payload(ciphertext: &CipherText, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    let combined = BASE64.decode(ciphertext.0.as_bytes())?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce_bytes, body) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), body)
        .map_err(|_| CryptoError::DecryptionFailed)
}

pub fn encrypt_record(record: &CapturedRecord, key: &SymmetricKey) -> Result<CipherText, CryptoError> {
    let payload = serde_json::to_vec(record)?;
    encrypt_payload(&payload, key)
}

pub fn decrypt_record(
    ciphertext: &CipherText,
    key: &SymmetricKey,
) -> Result<CapturedRecord, CryptoError> {
    let plaintext = decrypt_payload(ciphertext, key)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Random correlation token for one capture workflow. Not a security
/// boundary.
pub fn new_session_id() -> SessionId {
    let mut bytes = [0u8; SESSION_ID_LEN];
    OsRng.fill_bytes(&mut bytes);
    SessionId::new(hex_encode(&bytes)).expect("generated session id is non-empty hex")
}

/// SHA-256 integrity digest of the serialized record.
pub fn record_digest(record: &CapturedRecord) -> Result<String, CryptoError> {
    let payload = serde_json::to_vec(record)?;
    Ok(digest_hex(&payload))
}

pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingSecret(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSecret(name) => write!(f, "{name} is not configured"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedKey {
    pub encryption_key: String,
    pub session_token: String,
}

/// Remote key authority. Session keys are derived from a random token and
/// the authority secret; they are deliberately not derivable on the client
/// without contacting the authority.
#[derive(Debug, Clone)]
pub struct KeyAuthority {
    secret: String,
}

impl KeyAuthority {
    pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret("encryption secret key"));
        }
        Ok(Self { secret })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = env::var("NIBANDH_ENCRYPTION_SECRET_KEY")
            .map_err(|_| ConfigError::MissingSecret("NIBANDH_ENCRYPTION_SECRET_KEY"))?;
        Self::new(secret)
    }

    /// encryption_key = sha256(session_token + secret), hex. The token is
    /// returned alongside so the caller can correlate the session.
    pub fn issue_key(&self) -> IssuedKey {
        let mut token_bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut token_bytes);
        let session_token = hex_encode(&token_bytes);
        IssuedKey {
            encryption_key: self.derive_key_for(&session_token).to_hex(),
            session_token,
        }
    }

    /// Re-derives the session key for a previously issued token.
    pub fn derive_key_for(&self, session_token: &str) -> SymmetricKey {
        let mut hasher = Sha256::new();
        hasher.update(session_token.as_bytes());
        hasher.update(self.secret.as_bytes());
        SymmetricKey(hasher.finalize().into())
    }
}
