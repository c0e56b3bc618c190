//! In-process key store implementing [`CryptoBackend`].
//!
//! Each identity gets an Ed25519 signing key and an X25519 key-agreement key.
//! Key wrapping is ECIES-style: an ephemeral X25519 exchange, a BLAKE3-derived
//! key-encryption key, and AES-256-GCM over the wrapped bytes.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use ed25519_dalek::{Signer, SigningKey, Verifier};
use rand::rngs::OsRng;
use rand::RngCore;
use warden_types::EntityId;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::backend::CryptoBackend;
use crate::error::CryptoError;

const WRAP_CONTEXT: &str = "warden keyring 2024 x25519 key wrap";
const NONCE_LEN: usize = 12;
const PUBLIC_LEN: usize = 32;

struct KeyMaterial {
    signing: SigningKey,
    exchange: StaticSecret,
}

impl KeyMaterial {
    fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(seed.as_mut_slice());
        let signing = SigningKey::from_bytes(&seed);

        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let exchange = StaticSecret::from(secret);

        Self { signing, exchange }
    }
}

/// Key store holding private material for every registered identity.
pub struct InMemoryKeyring {
    keys: RwLock<HashMap<EntityId, KeyMaterial>>,
}

impl InMemoryKeyring {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Create key material for `identity`, replacing any existing keys.
    pub fn generate(&self, identity: EntityId) -> Result<EntityId, CryptoError> {
        let mut keys = self.keys.write().map_err(|_| CryptoError::LockPoisoned)?;
        keys.insert(identity, KeyMaterial::generate());
        Ok(identity)
    }

    pub fn generate_agent(&self) -> Result<EntityId, CryptoError> {
        self.generate(EntityId::new_agent())
    }

    pub fn generate_user(&self) -> Result<EntityId, CryptoError> {
        self.generate(EntityId::new_user())
    }

    pub fn contains(&self, identity: &EntityId) -> bool {
        self.keys
            .read()
            .map(|keys| keys.contains_key(identity))
            .unwrap_or(false)
    }

    fn with_keys<R>(
        &self,
        identity: &EntityId,
        f: impl FnOnce(&KeyMaterial) -> Result<R, CryptoError>,
    ) -> Result<R, CryptoError> {
        let keys = self.keys.read().map_err(|_| CryptoError::LockPoisoned)?;
        let material = keys
            .get(identity)
            .ok_or(CryptoError::UnknownIdentity(*identity))?;
        f(material)
    }
}

impl Default for InMemoryKeyring {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_kek(shared: &[u8], ephemeral: &PublicKey, recipient: &PublicKey) -> Zeroizing<[u8; 32]> {
    let mut material = Zeroizing::new(Vec::with_capacity(3 * PUBLIC_LEN));
    material.extend_from_slice(shared);
    material.extend_from_slice(ephemeral.as_bytes());
    material.extend_from_slice(recipient.as_bytes());
    Zeroizing::new(blake3::derive_key(WRAP_CONTEXT, &material))
}

fn seal_to(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut secret = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(secret.as_mut_slice());
    let ephemeral = StaticSecret::from(*secret);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let kek = derive_kek(shared.as_bytes(), &ephemeral_public, recipient);

    let cipher = Aes256Gcm::new_from_slice(&kek[..]).map_err(|_| CryptoError::InvalidKey)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::KeyWrap("seal failed".into()))?;

    let mut out = Vec::with_capacity(PUBLIC_LEN + NONCE_LEN + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open_with(secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < PUBLIC_LEN + NONCE_LEN {
        return Err(CryptoError::MalformedCiphertext);
    }
    let (public_bytes, rest) = sealed.split_at(PUBLIC_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let mut ephemeral = [0u8; PUBLIC_LEN];
    ephemeral.copy_from_slice(public_bytes);
    let ephemeral_public = PublicKey::from(ephemeral);
    let recipient_public = PublicKey::from(secret);
    let shared = secret.diffie_hellman(&ephemeral_public);
    let kek = derive_kek(shared.as_bytes(), &ephemeral_public, &recipient_public);

    let cipher = Aes256Gcm::new_from_slice(&kek[..]).map_err(|_| CryptoError::InvalidKey)?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

impl CryptoBackend for InMemoryKeyring {
    fn sign(&self, identity: &EntityId, digest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.with_keys(identity, |keys| {
            Ok(keys.signing.sign(digest).to_bytes().to_vec())
        })
    }

    fn verify(
        &self,
        identity: &EntityId,
        signature: &[u8],
        digest: &[u8],
    ) -> Result<bool, CryptoError> {
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return Ok(false);
        };
        self.with_keys(identity, |keys| {
            Ok(keys
                .signing
                .verifying_key()
                .verify(digest, &signature)
                .is_ok())
        })
    }

    fn wrap_key(&self, identity: &EntityId, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let recipient = self.with_keys(identity, |keys| Ok(PublicKey::from(&keys.exchange)))?;
        seal_to(&recipient, key)
    }

    fn unwrap_key(&self, identity: &EntityId, wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.with_keys(identity, |keys| open_with(&keys.exchange, wrapped))
            .map_err(|e| match e {
                CryptoError::DecryptionFailed => CryptoError::KeyWrap("unwrap failed".into()),
                other => other,
            })
    }

    fn encrypt(&self, identity: &EntityId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let recipient = self.with_keys(identity, |keys| Ok(PublicKey::from(&keys.exchange)))?;
        seal_to(&recipient, plaintext)
    }

    fn decrypt(&self, identity: &EntityId, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.with_keys(identity, |keys| open_with(&keys.exchange, ciphertext))
    }
}
