//! Hybrid encryption of typed messages.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_types::EntityId;
use zeroize::Zeroizing;

use crate::backend::CryptoBackend;
use crate::error::CryptoError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// An encrypted message addressed to one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedObject {
    pub recipient: EntityId,
    /// Per-message AES key, wrapped for the recipient.
    pub wrapped_key: Vec<u8>,
    /// `nonce || AES-256-GCM(serialized message)`.
    pub encrypted_envelope: Vec<u8>,
    /// Declared type of the inner message.
    pub message_type: String,
}

impl EncryptedObject {
    /// Decrypt as `identity` into `T`.
    ///
    /// Refuses before touching key material when the declared type is not
    /// `T::MESSAGE_TYPE`. The type name is also bound as associated data, so
    /// relabelling the envelope fails authentication.
    pub fn decrypt<T: Encryptable>(
        &self,
        backend: &dyn CryptoBackend,
        identity: &EntityId,
    ) -> Result<T, CryptoError> {
        if self.message_type != T::MESSAGE_TYPE {
            return Err(CryptoError::MessageTypeMismatch {
                expected: T::MESSAGE_TYPE.to_string(),
                found: self.message_type.clone(),
            });
        }

        let key = Zeroizing::new(backend.unwrap_key(identity, &self.wrapped_key)?);
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey);
        }
        if self.encrypted_envelope.len() < NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let (nonce, ciphertext) = self.encrypted_envelope.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: self.message_type.as_bytes(),
                    },
                )
                .map_err(|_| CryptoError::DecryptionFailed)?,
        );

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Transport unit: an encrypted object plus an unauthenticated correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessageEnvelope {
    pub thread_id: Uuid,
    pub payload: EncryptedObject,
}

impl EncryptedMessageEnvelope {
    pub fn new(thread_id: Uuid, payload: EncryptedObject) -> Self {
        Self { thread_id, payload }
    }

    pub fn recipient(&self) -> EntityId {
        self.payload.recipient
    }
}

/// A message type that can travel encrypted.
pub trait Encryptable: Serialize + DeserializeOwned {
    const MESSAGE_TYPE: &'static str;

    /// Encrypt for `recipient` under a fresh symmetric key.
    fn encrypt_for(
        &self,
        backend: &dyn CryptoBackend,
        recipient: &EntityId,
    ) -> Result<EncryptedObject, CryptoError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(self)?);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut_slice());
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::InvalidKey)?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: Self::MESSAGE_TYPE.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut encrypted_envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        encrypted_envelope.extend_from_slice(&nonce);
        encrypted_envelope.extend_from_slice(&ciphertext);

        Ok(EncryptedObject {
            recipient: *recipient,
            wrapped_key: backend.wrap_key(recipient, &key[..])?,
            encrypted_envelope,
            message_type: Self::MESSAGE_TYPE.to_string(),
        })
    }

    /// Encrypt and wrap in a transport envelope.
    fn seal_for(
        &self,
        backend: &dyn CryptoBackend,
        recipient: &EntityId,
        thread_id: Uuid,
    ) -> Result<EncryptedMessageEnvelope, CryptoError> {
        Ok(EncryptedMessageEnvelope::new(
            thread_id,
            self.encrypt_for(backend, recipient)?,
        ))
    }
}
