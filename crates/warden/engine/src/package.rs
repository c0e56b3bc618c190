//! Package acquisition: signed manifests, sources, and the caching loader.
//!
//! A package container is published with a [`PackageManifest`] whose signature
//! chain starts with the publisher and continues with any approvers. A secure
//! load verifies that chain and the content hash before the container is
//! handed out; an insecure load trusts whatever the source returns. The
//! [`CachingPackageLoader`] caches per container id and upgrades an
//! insecurely loaded copy when a secure load is requested.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use warden_crypto::{
    ChainSigned, ContentHash, CryptoBackend, CryptoError, Signable, SignableHasher, SignatureChain,
};
use warden_types::{EntityId, PackageId};

use crate::error::{PackageError, PluginError};
use crate::plugin::{Plugin, PluginRegistry};

/// A loaded package container.
pub trait PackageContainer: Send + Sync {
    fn container_id(&self) -> PackageId;

    /// Hash of the container content as loaded.
    fn content_hash(&self) -> ContentHash;

    /// Emit the plugin for `package` with the merged configuration.
    fn emit_plugin(&self, package: &PackageId, configuration: &Value) -> Result<Box<dyn Plugin>, PluginError>;
}

/// What the workflow engine needs from package storage.
#[async_trait]
pub trait PackageLoader: Send + Sync {
    /// Load the container holding `package`.
    async fn load_container(
        &self,
        package: &PackageId,
        secure: bool,
    ) -> Result<Arc<dyn PackageContainer>, PackageError>;

    /// Whether the loaded container's content hash equals `expected`.
    async fn check_content_hash(
        &self,
        container: &PackageId,
        expected: &ContentHash,
    ) -> Result<bool, PackageError>;
}

/// Where containers come from, uncached.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn fetch(
        &self,
        container: &PackageId,
        secure: bool,
    ) -> Result<Arc<dyn PackageContainer>, PackageError>;
}

/// Signed description of a package container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub container_id: PackageId,
    pub name: String,
    pub version: String,
    pub plugins: Vec<PackageId>,
    pub content_hash: ContentHash,
    #[serde(default)]
    pub chain: SignatureChain,
}

impl PackageManifest {
    pub fn new(
        container_id: PackageId,
        name: impl Into<String>,
        version: impl Into<String>,
        content: &[u8],
    ) -> Self {
        Self {
            container_id: container_id.container_id(),
            name: name.into(),
            version: version.into(),
            plugins: Vec::new(),
            content_hash: ContentHash::hash(content),
            chain: SignatureChain::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: PackageId) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// The publisher is whoever signed first.
    pub fn publisher(&self) -> Option<EntityId> {
        self.chain.signatures.first().and_then(|s| s.signer)
    }
}

impl Signable for PackageManifest {
    const DOMAIN: &'static str = "PackageManifest";
    const EXCLUDED_FIELDS: &'static [&'static str] = &["chain"];

    fn write_signable(&self, hasher: &mut SignableHasher) -> Result<(), CryptoError> {
        hasher
            .field("container_id", &self.container_id)?
            .field("name", &self.name)?
            .field("version", &self.version)?
            .field("plugins", &self.plugins)?
            .field("content_hash", &self.content_hash)?;
        Ok(())
    }
}

impl ChainSigned for PackageManifest {
    fn chain(&self) -> &SignatureChain {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut SignatureChain {
        &mut self.chain
    }
}

/// Container backed by a manifest and a plugin registry.
pub struct RegistryContainer {
    manifest: PackageManifest,
    content_hash: ContentHash,
    registry: Arc<PluginRegistry>,
}

impl PackageContainer for RegistryContainer {
    fn container_id(&self) -> PackageId {
        self.manifest.container_id
    }

    fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    fn emit_plugin(&self, package: &PackageId, configuration: &Value) -> Result<Box<dyn Plugin>, PluginError> {
        if package.container_id() != self.manifest.container_id {
            return Err(PluginError::WrongContainer {
                package: *package,
                container: self.manifest.container_id,
            });
        }
        if !self.manifest.plugins.contains(package) {
            return Err(PluginError::UnknownPlugin(*package));
        }
        self.registry.emit(package, configuration)
    }
}

struct Published {
    manifest: PackageManifest,
    content: Vec<u8>,
    registry: Arc<PluginRegistry>,
}

/// In-memory package store.
///
/// Secure fetches require a valid manifest chain whose first signer is a
/// trusted publisher, and content matching the manifest hash.
pub struct InMemoryPackageSource {
    crypto: Arc<dyn CryptoBackend>,
    trusted_publishers: RwLock<HashSet<EntityId>>,
    packages: RwLock<HashMap<PackageId, Published>>,
    fetches: AtomicUsize,
}

impl InMemoryPackageSource {
    pub fn new(crypto: Arc<dyn CryptoBackend>) -> Self {
        Self {
            crypto,
            trusted_publishers: RwLock::new(HashSet::new()),
            packages: RwLock::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn trust_publisher(&self, publisher: EntityId) -> Result<(), PackageError> {
        self.trusted_publishers
            .write()
            .map_err(|_| PackageError::LockPoisoned)?
            .insert(publisher);
        Ok(())
    }

    pub fn publish(
        &self,
        manifest: PackageManifest,
        content: Vec<u8>,
        registry: Arc<PluginRegistry>,
    ) -> Result<(), PackageError> {
        let mut packages = self.packages.write().map_err(|_| PackageError::LockPoisoned)?;
        info!(container = %manifest.container_id, name = %manifest.name, version = %manifest.version, "Package published");
        packages.insert(
            manifest.container_id,
            Published {
                manifest,
                content,
                registry,
            },
        );
        Ok(())
    }

    /// Number of fetches served so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn verify(&self, published: &Published) -> Result<(), PackageError> {
        let container = published.manifest.container_id;
        if !published.manifest.verify_chain(self.crypto.as_ref()) {
            return Err(PackageError::SignaturesInvalid {
                container,
                reason: "manifest signature chain does not verify".into(),
            });
        }
        let trusted = self
            .trusted_publishers
            .read()
            .map_err(|_| PackageError::LockPoisoned)?;
        match published.manifest.publisher() {
            Some(publisher) if trusted.contains(&publisher) => {}
            _ => {
                return Err(PackageError::SignaturesInvalid {
                    container,
                    reason: "publisher is not trusted".into(),
                })
            }
        }
        if ContentHash::hash(&published.content) != published.manifest.content_hash {
            return Err(PackageError::ContentHashMismatch(container));
        }
        Ok(())
    }
}

#[async_trait]
impl PackageSource for InMemoryPackageSource {
    async fn fetch(
        &self,
        container: &PackageId,
        secure: bool,
    ) -> Result<Arc<dyn PackageContainer>, PackageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let packages = self.packages.read().map_err(|_| PackageError::LockPoisoned)?;
        let published = packages
            .get(container)
            .ok_or(PackageError::NotFound(*container))?;

        if secure {
            self.verify(published)?;
        }

        Ok(Arc::new(RegistryContainer {
            manifest: published.manifest.clone(),
            content_hash: ContentHash::hash(&published.content),
            registry: published.registry.clone(),
        }))
    }
}

struct CachedContainer {
    container: Arc<dyn PackageContainer>,
    secure: bool,
}

/// Per-container cache in front of a [`PackageSource`].
///
/// The cache lock is held across the fetch, so concurrent loads of the same
/// container wait for the first instead of fetching again.
pub struct CachingPackageLoader<S: PackageSource> {
    source: S,
    cache: Mutex<HashMap<PackageId, CachedContainer>>,
    requests: AtomicUsize,
}

impl<S: PackageSource> CachingPackageLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Number of `load_container` calls, cached or not.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub async fn invalidate(&self, container: &PackageId) {
        self.cache.lock().await.remove(&container.container_id());
    }
}

#[async_trait]
impl<S: PackageSource> PackageLoader for CachingPackageLoader<S> {
    async fn load_container(
        &self,
        package: &PackageId,
        secure: bool,
    ) -> Result<Arc<dyn PackageContainer>, PackageError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let container_id = package.container_id();
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(&container_id) {
            if cached.secure || !secure {
                debug!(container = %container_id, secure = cached.secure, "Package cache hit");
                return Ok(cached.container.clone());
            }
            warn!(container = %container_id, "Replacing insecurely loaded package with secure load");
            cache.remove(&container_id);
        }

        let container = self.source.fetch(&container_id, secure).await?;
        cache.insert(
            container_id,
            CachedContainer {
                container: container.clone(),
                secure,
            },
        );
        Ok(container)
    }

    async fn check_content_hash(
        &self,
        container: &PackageId,
        expected: &ContentHash,
    ) -> Result<bool, PackageError> {
        let container_id = container.container_id();
        let cache = self.cache.lock().await;
        let cached = cache
            .get(&container_id)
            .ok_or(PackageError::NotLoaded(container_id))?;
        Ok(cached.container.content_hash() == *expected)
    }
}
