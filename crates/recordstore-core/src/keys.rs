//! Store key material and value encryption
//!
//! A store is either unencrypted or protected by a 32-byte key that is given
//! directly (`raw`, 64 hex chars) or derived from a pass phrase and a random
//! salt (`kdf:blake3`). Only a [`KeyRecord`] is persisted: the method, the
//! salt and a verifier that lets `open` reject wrong key material without
//! touching any entry.
//!
//! Encrypted values are laid out as `nonce(16) || ciphertext || tag(32)`.
//! The keystream is the BLAKE3 XOF keyed with a derived encryption key over
//! the nonce; the tag is a keyed BLAKE3 hash of `nonce || ciphertext`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

const KDF_CONTEXT: &str = "recordstore 2024-01-01 store key derivation";
const ENC_CONTEXT: &str = "recordstore 2024-01-01 value encryption";
const MAC_CONTEXT: &str = "recordstore 2024-01-01 value authentication";
const VERIFIER_INPUT: &[u8] = b"recordstore key verifier";

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// How the store key is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyMethod {
    Unencrypted,
    Raw,
    Kdf,
}

impl KeyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyMethod::Unencrypted => "none",
            KeyMethod::Raw => "raw",
            KeyMethod::Kdf => "kdf:blake3",
        }
    }

    /// Pick the method when the caller left it unspecified.
    pub fn resolve(method: Option<KeyMethod>, pass_key: Option<&PassKey>) -> KeyMethod {
        match (method, pass_key) {
            (Some(method), _) => method,
            (None, Some(_)) => KeyMethod::Kdf,
            (None, None) => KeyMethod::Unencrypted,
        }
    }
}

impl fmt::Display for KeyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(KeyMethod::Unencrypted),
            "raw" => Ok(KeyMethod::Raw),
            "kdf:blake3" | "kdf" => Ok(KeyMethod::Kdf),
            other => Err(Error::input(format!("Unsupported key method: {other}"))),
        }
    }
}

impl TryFrom<String> for KeyMethod {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<KeyMethod> for String {
    fn from(method: KeyMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Caller-supplied key material: a pass phrase or a hex-encoded raw key.
#[derive(Clone)]
pub struct PassKey(Zeroizing<String>);

impl PassKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PassKey {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for PassKey {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl fmt::Debug for PassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PassKey(<redacted>)")
    }
}

/// Persisted description of a store's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub method: KeyMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
}

impl KeyRecord {
    /// Create a fresh record and the key it describes.
    pub fn create(method: KeyMethod, pass_key: Option<&PassKey>) -> Result<(KeyRecord, StoreKey)> {
        let salt = match method {
            KeyMethod::Kdf => Some(rand::random::<[u8; SALT_LEN]>().to_vec()),
            _ => None,
        };
        let key = StoreKey::derive(method, pass_key, salt.as_deref())?;
        let record = KeyRecord {
            method,
            salt: salt.map(hex::encode),
            verifier: key.verifier(),
        };
        Ok((record, key))
    }

    /// Rebuild the store key from caller material, rejecting a mismatch.
    pub fn unlock(&self, method: Option<KeyMethod>, pass_key: Option<&PassKey>) -> Result<StoreKey> {
        if let Some(method) = method {
            if method != self.method {
                return Err(Error::input(format!(
                    "Key method mismatch: store uses {}, got {method}",
                    self.method
                )));
            }
        }

        let salt = self
            .salt
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|e| Error::unexpected("Stored key salt is corrupt").with_source(e))?;
        let key = StoreKey::derive(self.method, pass_key, salt.as_deref())?;

        if key.verifier() != self.verifier {
            return Err(Error::input("invalid key material"));
        }
        Ok(key)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::unexpected("Failed to encode key record").with_source(e))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::unexpected("Stored key record is corrupt").with_source(e))
    }
}

/// An unlocked store key. Material is wiped on drop.
#[derive(Clone)]
pub struct StoreKey {
    method: KeyMethod,
    material: Option<Zeroizing<[u8; 32]>>,
}

impl StoreKey {
    pub fn unencrypted() -> Self {
        Self {
            method: KeyMethod::Unencrypted,
            material: None,
        }
    }

    fn derive(method: KeyMethod, pass_key: Option<&PassKey>, salt: Option<&[u8]>) -> Result<Self> {
        let material = match method {
            KeyMethod::Unencrypted => {
                if pass_key.is_some_and(|p| !p.is_empty()) {
                    return Err(Error::input("A pass key was given for an unencrypted store"));
                }
                None
            }
            KeyMethod::Raw => {
                let pass = pass_key.ok_or_else(|| Error::input("Key method raw requires a key"))?;
                let mut raw = Zeroizing::new([0u8; 32]);
                hex::decode_to_slice(pass.expose(), raw.as_mut_slice()).map_err(|_| {
                    Error::input("A raw key must be 64 hexadecimal characters")
                })?;
                Some(raw)
            }
            KeyMethod::Kdf => {
                let pass =
                    pass_key.ok_or_else(|| Error::input("Key method kdf requires a pass key"))?;
                let salt = salt.ok_or_else(|| Error::unexpected("Missing key derivation salt"))?;
                let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
                hasher.update(salt);
                hasher.update(pass.expose().as_bytes());
                Some(Zeroizing::new(*hasher.finalize().as_bytes()))
            }
        };
        Ok(Self { method, material })
    }

    pub fn method(&self) -> KeyMethod {
        self.method
    }

    pub fn is_encrypted(&self) -> bool {
        self.material.is_some()
    }

    fn verifier(&self) -> Option<String> {
        self.material
            .as_ref()
            .map(|key| hex::encode(blake3::keyed_hash(key, VERIFIER_INPUT).as_bytes()))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let Some(material) = &self.material else {
            return plaintext.to_vec();
        };
        let (enc_key, mac_key) = subkeys(material);
        let nonce = rand::random::<[u8; NONCE_LEN]>();

        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(plaintext);
        apply_keystream(&enc_key, &nonce, &mut out[NONCE_LEN..]);
        let tag = authenticate(&mac_key, &out);
        out.extend_from_slice(tag.as_bytes());
        out
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let Some(material) = &self.material else {
            return Ok(data.to_vec());
        };
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::unexpected("Encrypted value is truncated"));
        }
        let (enc_key, mac_key) = subkeys(material);
        let (body, tag) = data.split_at(data.len() - TAG_LEN);
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag);

        // blake3::Hash equality is constant-time
        if authenticate(&mac_key, body) != blake3::Hash::from(tag_bytes) {
            return Err(Error::input("invalid key material"));
        }

        let (nonce, ciphertext) = body.split_at(NONCE_LEN);
        let mut plaintext = ciphertext.to_vec();
        apply_keystream(&enc_key, nonce, &mut plaintext);
        Ok(plaintext)
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreKey")
            .field("method", &self.method)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

fn subkeys(material: &[u8; 32]) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
    (
        Zeroizing::new(blake3::derive_key(ENC_CONTEXT, material)),
        Zeroizing::new(blake3::derive_key(MAC_CONTEXT, material)),
    )
}

fn apply_keystream(enc_key: &[u8; 32], nonce: &[u8], buf: &mut [u8]) {
    let mut stream = Zeroizing::new(vec![0u8; buf.len()]);
    blake3::Hasher::new_keyed(enc_key)
        .update(nonce)
        .finalize_xof()
        .fill(&mut stream);
    for (byte, k) in buf.iter_mut().zip(stream.iter()) {
        *byte ^= k;
    }
}

fn authenticate(mac_key: &[u8; 32], body: &[u8]) -> blake3::Hash {
    blake3::keyed_hash(mac_key, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    const RAW: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_kdf_unlock_with_same_pass() {
        let pass = PassKey::from("correct horse");
        let (record, key) = KeyRecord::create(KeyMethod::Kdf, Some(&pass)).unwrap();
        assert!(record.salt.is_some());

        let unlocked = record.unlock(None, Some(&pass)).unwrap();
        let sealed = key.encrypt(b"secret value");
        assert_eq!(unlocked.decrypt(&sealed).unwrap(), b"secret value".to_vec());
    }

    #[test]
    fn test_wrong_pass_is_input_error() {
        let (record, _) = KeyRecord::create(KeyMethod::Kdf, Some(&"right".into())).unwrap();
        let err = record.unlock(None, Some(&"wrong".into())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_raw_key_validation() {
        assert!(KeyRecord::create(KeyMethod::Raw, Some(&RAW.into())).is_ok());
        let err = KeyRecord::create(KeyMethod::Raw, Some(&"abcd".into())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        let err = KeyRecord::create(KeyMethod::Raw, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_method_mismatch() {
        let (record, _) = KeyRecord::create(KeyMethod::Raw, Some(&RAW.into())).unwrap();
        let err = record
            .unlock(Some(KeyMethod::Kdf), Some(&RAW.into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_unencrypted_passthrough() {
        let (record, key) = KeyRecord::create(KeyMethod::Unencrypted, None).unwrap();
        assert_eq!(record.verifier, None);
        assert_eq!(key.encrypt(b"plain"), b"plain".to_vec());
        assert!(record.unlock(None, None).is_ok());
    }

    #[test]
    fn test_ciphertext_differs_and_tamper_is_detected() {
        let (_, key) = KeyRecord::create(KeyMethod::Raw, Some(&RAW.into())).unwrap();
        let a = key.encrypt(b"value");
        let b = key.encrypt(b"value");
        assert_ne!(a, b);
        assert_ne!(&a[NONCE_LEN..NONCE_LEN + 5], b"value");

        let mut tampered = a.clone();
        tampered[NONCE_LEN] ^= 0x01;
        assert!(key.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_record_json() {
        let (record, _) = KeyRecord::create(KeyMethod::Kdf, Some(&"pass".into())).unwrap();
        let json = record.to_json().unwrap();
        assert!(json.contains(r#""method":"kdf:blake3""#));
        assert_eq!(KeyRecord::from_json(&json).unwrap(), record);
    }

    #[test]
    fn test_pass_key_debug_is_redacted() {
        let pass = PassKey::from("hunter2");
        assert!(!format!("{pass:?}").contains("hunter2"));
    }
}
