//! Warden Crypto - the signing and encryption protocol
//!
//! Every message type in the workflow engine is [`Signable`]: it names the
//! fields that contribute to its canonical hash, and everything else
//! (signatures, nonces, fields that mutate hop by hop) stays out of the digest.
//!
//! ## Signatures
//!
//! A single signature signs `H(signable_hash, H(metadata))`. A signature chain
//! extends that digest with the full record hash of every earlier signature, so
//! signature *k* attests to signatures *0..k*. Reordering a chain breaks it.
//!
//! ## Encryption
//!
//! Messages are encrypted with a fresh AES-256-GCM key; the key is wrapped for
//! the recipient by the [`CryptoBackend`]. The declared message type travels
//! with the ciphertext and is bound as associated data, and decryption refuses
//! to deserialize into a different type.

#![deny(unsafe_code)]

pub mod backend;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod keyring;
pub mod signature;

pub use backend::CryptoBackend;
pub use envelope::{Encryptable, EncryptedMessageEnvelope, EncryptedObject};
pub use error::CryptoError;
pub use hash::{ContentHash, SignableHasher};
pub use keyring::InMemoryKeyring;
pub use signature::{ChainSigned, Signable, SignedObject, Signature, SignatureChain};
