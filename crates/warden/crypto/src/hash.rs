use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// BLAKE3 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the BLAKE3 hash of arbitrary data.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the canonical JSON form of a value.
    ///
    /// The value is routed through `serde_json::Value` first so map keys are
    /// emitted in sorted order regardless of the source collection.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, CryptoError> {
        Ok(Self::hash(&canonical_bytes(value)?))
    }

    /// Hash an ordered sequence of hashes into one.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a ContentHash>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&part.0);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub(crate) fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CryptoError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// Incremental builder for a signable hash.
///
/// Fields are fed in declaration order. Each field contributes its name and
/// its canonical JSON encoding, both length-prefixed, so two different field
/// layouts can never collide on the same byte stream.
pub struct SignableHasher {
    inner: blake3::Hasher,
}

impl SignableHasher {
    /// Start a hash for one message type. The domain keeps equal field sets of
    /// different types apart.
    pub fn new(domain: &str) -> Self {
        let mut inner = blake3::Hasher::new();
        write_prefixed(&mut inner, domain.as_bytes());
        Self { inner }
    }

    pub fn field<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<&mut Self, CryptoError> {
        let bytes = canonical_bytes(value)?;
        write_prefixed(&mut self.inner, name.as_bytes());
        write_prefixed(&mut self.inner, &bytes);
        Ok(self)
    }

    /// Feed an already-computed hash, e.g. the signable hash of a nested object.
    pub fn field_hash(&mut self, name: &str, hash: &ContentHash) -> &mut Self {
        write_prefixed(&mut self.inner, name.as_bytes());
        write_prefixed(&mut self.inner, hash.as_bytes());
        self
    }

    pub fn finish(&self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}

fn write_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
