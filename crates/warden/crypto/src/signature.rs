//! Single signatures and cumulative signature chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_types::EntityId;

use crate::backend::CryptoBackend;
use crate::error::CryptoError;
use crate::hash::{ContentHash, SignableHasher};

/// One signature record.
///
/// The metadata (signer, display text, timestamp) is itself signed; only the
/// signature bytes are left out of the digest they sign.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub signature: Vec<u8>,
    #[serde(default)]
    pub signer: Option<EntityId>,
    #[serde(default)]
    pub signer_display: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Signature {
    /// A signature record with metadata filled in and no bytes yet.
    pub fn unsigned(signer: EntityId, display: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            signature: Vec::new(),
            signer: Some(signer),
            signer_display: display.into(),
            timestamp: Some(at),
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Hash of the metadata without the signature bytes.
    pub fn metadata_hash(&self) -> Result<ContentHash, CryptoError> {
        let mut hasher = SignableHasher::new("Signature.metadata");
        hasher
            .field("signer", &self.signer)?
            .field("signer_display", &self.signer_display)?
            .field("timestamp", &self.timestamp)?;
        Ok(hasher.finish())
    }

    /// Hash of the full record, bytes included.
    pub fn record_hash(&self) -> Result<ContentHash, CryptoError> {
        let mut hasher = SignableHasher::new("Signature.record");
        hasher
            .field_hash("metadata", &self.metadata_hash()?)
            .field("signature", &self.signature)?;
        Ok(hasher.finish())
    }
}

/// Digest signed by the signature following `prior` in a chain.
///
/// `H(base, H(prior[0]), .., H(prior[k-1]), H(current metadata))`. A lone
/// signature is the degenerate chain with no prior entries.
pub fn chain_digest(
    base: &ContentHash,
    prior: &[Signature],
    current: &Signature,
) -> Result<ContentHash, CryptoError> {
    let mut parts = Vec::with_capacity(prior.len() + 2);
    parts.push(*base);
    for sig in prior {
        parts.push(sig.record_hash()?);
    }
    parts.push(current.metadata_hash()?);
    Ok(ContentHash::combine(parts.iter()))
}

/// An object with a canonical, signature-free content hash.
///
/// Implementors feed every included field to the hasher in declaration order
/// and list what they leave out in `EXCLUDED_FIELDS`, so the signed surface of
/// each message type is visible at the definition site.
pub trait Signable {
    /// Domain separator, usually the type name.
    const DOMAIN: &'static str;

    /// Fields that never contribute to the signable hash.
    const EXCLUDED_FIELDS: &'static [&'static str];

    fn write_signable(&self, hasher: &mut SignableHasher) -> Result<(), CryptoError>;

    fn signable_hash(&self) -> Result<ContentHash, CryptoError> {
        let mut hasher = SignableHasher::new(Self::DOMAIN);
        self.write_signable(&mut hasher)?;
        Ok(hasher.finish())
    }
}

/// A [`Signable`] carrying exactly one signature.
pub trait SignedObject: Signable {
    fn signature(&self) -> &Signature;

    fn signature_mut(&mut self) -> &mut Signature;

    fn is_signed(&self) -> bool {
        self.signature().is_signed()
    }

    fn signer(&self) -> Option<EntityId> {
        self.signature().signer
    }

    /// Digest over the current object state and signature metadata.
    fn signing_digest(&self) -> Result<ContentHash, CryptoError> {
        chain_digest(&self.signable_hash()?, &[], self.signature())
    }

    /// Sign as `signer`, replacing any previous signature.
    fn sign(
        &mut self,
        backend: &dyn CryptoBackend,
        signer: EntityId,
        display: &str,
    ) -> Result<(), CryptoError> {
        *self.signature_mut() = Signature::unsigned(signer, display, Utc::now());
        let digest = self.signing_digest()?;
        let bytes = backend.sign(&signer, digest.as_bytes())?;
        self.signature_mut().signature = bytes;
        Ok(())
    }

    fn verify_signature(&self, backend: &dyn CryptoBackend) -> Result<bool, CryptoError> {
        let sig = self.signature();
        let signer = sig.signer.ok_or(CryptoError::NotSigned)?;
        if !sig.is_signed() {
            return Err(CryptoError::NotSigned);
        }
        let digest = self.signing_digest()?;
        backend.verify(&signer, &sig.signature, digest.as_bytes())
    }

    /// `true` only for a present signature that verifies. Errors count as failure.
    fn verify(&self, backend: &dyn CryptoBackend) -> bool {
        match self.verify_signature(backend) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(domain = Self::DOMAIN, error = %e, "Signature verification errored");
                false
            }
        }
    }
}

/// Ordered, cumulative list of signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureChain {
    pub signatures: Vec<Signature>,
}

impl SignatureChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signers(&self) -> Vec<EntityId> {
        self.signatures.iter().filter_map(|s| s.signer).collect()
    }
}

/// A [`Signable`] carrying a signature chain.
pub trait ChainSigned: Signable {
    fn chain(&self) -> &SignatureChain;

    fn chain_mut(&mut self) -> &mut SignatureChain;

    /// Append a signature that attests to the content and every earlier signer.
    fn append_signature(
        &mut self,
        backend: &dyn CryptoBackend,
        signer: EntityId,
        display: &str,
    ) -> Result<(), CryptoError> {
        let base = self.signable_hash()?;
        let mut sig = Signature::unsigned(signer, display, Utc::now());
        let digest = chain_digest(&base, &self.chain().signatures, &sig)?;
        sig.signature = backend.sign(&signer, digest.as_bytes())?;
        self.chain_mut().signatures.push(sig);
        Ok(())
    }

    /// Replay the chain in order; every link must verify.
    fn verify_chain_signatures(&self, backend: &dyn CryptoBackend) -> Result<bool, CryptoError> {
        let sigs = &self.chain().signatures;
        if sigs.is_empty() {
            return Err(CryptoError::EmptyChain);
        }
        let base = self.signable_hash()?;
        for (k, sig) in sigs.iter().enumerate() {
            let signer = sig.signer.ok_or(CryptoError::NotSigned)?;
            if !sig.is_signed() {
                return Ok(false);
            }
            let digest = chain_digest(&base, &sigs[..k], sig)?;
            if !backend.verify(&signer, &sig.signature, digest.as_bytes())? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn verify_chain(&self, backend: &dyn CryptoBackend) -> bool {
        match self.verify_chain_signatures(backend) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(domain = Self::DOMAIN, error = %e, "Chain verification errored");
                false
            }
        }
    }
}
