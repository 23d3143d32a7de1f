use crate::signature::{NarSignature, Signature};
use base64::{Engine, engine::general_purpose};
use ed25519_dalek::{Signer, SigningKey as DalekSigningKey};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Failed to read signing key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode base64: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Failed to parse signing key: {0}")]
    ParseKey(String),

    #[error("Invalid signing key length: expected 32 or 64 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// A signing key with a name
#[derive(Clone, Debug)]
pub struct SigningKey {
    /// The name of the key (e.g., "cache.example.com-1")
    pub name: Vec<u8>,
    /// The raw key bytes (32 or 64 bytes)
    pub key: Vec<u8>,
}

impl SigningKey {
    /// Create a new signing key
    pub fn new(name: Vec<u8>, key: Vec<u8>) -> Result<Self, SigningError> {
        if key.len() != 32 && key.len() != 64 {
            return Err(SigningError::InvalidKeyLength(key.len()));
        }
        Ok(Self { name, key })
    }

    /// Parse a secret key from a file
    ///
    /// The file should contain a key in the format: "name:base64-key"
    /// The key can be either 32 bytes (secret key only) or 64 bytes (keypair)
    pub fn from_file(path: &Path) -> Result<Self, SigningError> {
        let content = std::fs::read(path)?;
        Self::parse(&content)
    }

    /// Parse a secret key from bytes
    ///
    /// The bytes should be in the format: b"name:base64-key"
    pub fn parse(s: &[u8]) -> Result<Self, SigningError> {
        let colon_pos = s
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| SigningError::ParseKey("Sign key does not contain a ':'".to_string()))?;

        let name = &s[..colon_pos];
        let key_base64 = &s[colon_pos + 1..];

        if name.is_empty() {
            return Err(SigningError::ParseKey("Empty key name".to_string()));
        }

        // Trim whitespace from base64 part
        let key_base64 = match key_base64.iter().rposition(|&b| !b.is_ascii_whitespace()) {
            Some(end) => &key_base64[..=end],
            None => key_base64,
        };
        let key_base64 = match key_base64.iter().position(|&b| !b.is_ascii_whitespace()) {
            Some(start) => &key_base64[start..],
            None => key_base64,
        };

        let key = general_purpose::STANDARD.decode(key_base64)?;

        // Validate the key by trying to create a DalekSigningKey
        if key.len() == 32 {
            let key_bytes: [u8; 32] = key.as_slice().try_into().map_err(|_| {
                SigningError::ParseKey("Failed to convert key bytes to [u8; 32]".to_string())
            })?;
            let _ = DalekSigningKey::from_bytes(&key_bytes);
        } else if key.len() == 64 {
            let keypair_bytes: [u8; 64] = key.as_slice().try_into().map_err(|_| {
                SigningError::ParseKey("Failed to convert key bytes to [u8; 64]".to_string())
            })?;
            let _ = DalekSigningKey::from_keypair_bytes(&keypair_bytes)
                .map_err(|e| SigningError::ParseKey(format!("Invalid Ed25519 keypair: {e}")))?;
        } else {
            return Err(SigningError::InvalidKeyLength(key.len()));
        }

        Ok(Self {
            name: name.to_vec(),
            key,
        })
    }

    /// Get the Ed25519 signing key
    fn to_dalek_key(&self) -> DalekSigningKey {
        if self.key.len() == 32 {
            let key_bytes: [u8; 32] = self
                .key
                .as_slice()
                .try_into()
                .expect("Invalid key length for Ed25519");
            DalekSigningKey::from_bytes(&key_bytes)
        } else if self.key.len() == 64 {
            let keypair_bytes: [u8; 64] = self
                .key
                .as_slice()
                .try_into()
                .expect("Invalid key length for Ed25519 keypair");
            DalekSigningKey::from_keypair_bytes(&keypair_bytes).expect("Invalid Ed25519 keypair")
        } else {
            panic!("Invalid signing key length: {}", self.key.len());
        }
    }

    /// Sign a message and return a NarSignature
    pub fn sign(&self, msg: &[u8]) -> NarSignature {
        let dalek_key = self.to_dalek_key();
        let signature = dalek_key.sign(msg);
        let sig = Signature::from_bytes(&signature.to_bytes())
            .expect("Ed25519 signature should always be valid");
        NarSignature::new(self.name.clone(), sig)
    }

    /// Sign a message and return the signature string in the format "name:base64-signature"
    pub fn sign_string(&self, msg: &[u8]) -> String {
        self.sign(msg).to_text()
    }
}
