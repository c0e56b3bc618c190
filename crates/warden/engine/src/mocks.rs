use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use warden_crypto::EncryptedMessageEnvelope;
use warden_types::{EntityId, PackageId, PluginResult};

use crate::access::{AccessRule, AccessRulesProvider, AgentConfiguration};
use crate::error::{AccessError, PluginError, TransportError};
use crate::plugin::Plugin;
use crate::transport::Transport;

/// Access rules held in memory, per agent.
///
/// Agents without an entry get an empty configuration, which denies everyone.
pub struct StaticAccessRules {
    agents: RwLock<HashMap<EntityId, AgentConfiguration>>,
}

impl StaticAccessRules {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Allow `user` to run `package` (and everything it covers) on `agent`.
    pub fn grant(&self, agent: EntityId, user: EntityId, package: PackageId) {
        if let Ok(mut agents) = self.agents.write() {
            agents
                .entry(agent)
                .or_default()
                .access_rules
                .push(AccessRule { user, package });
        }
    }

    /// Allow `user` to run anything on `agent`.
    pub fn grant_all(&self, agent: EntityId, user: EntityId) {
        if let Ok(mut agents) = self.agents.write() {
            agents.entry(agent).or_default().granted_access.push(user);
        }
    }

    pub fn configure_package(&self, agent: EntityId, package: PackageId, configuration: Value) {
        if let Ok(mut agents) = self.agents.write() {
            agents
                .entry(agent)
                .or_default()
                .package_configuration
                .insert(package, configuration);
        }
    }
}

impl Default for StaticAccessRules {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessRulesProvider for StaticAccessRules {
    fn get_configuration(&self, agent: &EntityId) -> Result<AgentConfiguration, AccessError> {
        let agents = self.agents.read().map_err(|_| AccessError::LockPoisoned)?;
        Ok(agents.get(agent).cloned().unwrap_or_default())
    }
}

/// Transport that keeps every envelope in memory.
pub struct InMemoryTransport {
    sent: Mutex<Vec<EncryptedMessageEnvelope>>,
    rejected: RwLock<HashSet<EntityId>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            rejected: RwLock::new(HashSet::new()),
        }
    }

    /// Make every send to `recipient` fail.
    pub fn reject(&self, recipient: EntityId) {
        if let Ok(mut rejected) = self.rejected.write() {
            rejected.insert(recipient);
        }
    }

    pub fn sent(&self) -> Vec<EncryptedMessageEnvelope> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every envelope addressed to `recipient`.
    pub fn take_for(&self, recipient: &EntityId) -> Vec<EncryptedMessageEnvelope> {
        let Ok(mut sent) = self.sent.lock() else {
            return Vec::new();
        };
        let (taken, kept): (Vec<_>, Vec<_>) = sent
            .drain(..).partition(|e| e.recipient() == *recipient);
        *sent = kept;
        taken
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn enqueue(&self, envelope: EncryptedMessageEnvelope) -> Result<(), TransportError> {
        let recipient = envelope.recipient();
        let rejected = self
            .rejected
            .read()
            .map_err(|_| TransportError::LockPoisoned)?
            .contains(&recipient);
        if rejected {
            return Err(TransportError::Rejected(recipient));
        }
        self.sent
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?
            .push(envelope);
        Ok(())
    }
}

type PluginFn = dyn Fn(Option<&PluginResult>) -> Result<PluginResult, PluginError> + Send + Sync;

/// Plugin backed by a closure.
pub struct FnPlugin {
    run: Box<PluginFn>,
}

impl FnPlugin {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(Option<&PluginResult>) -> Result<PluginResult, PluginError> + Send + Sync + 'static,
    {
        Self { run: Box::new(run) }
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    async fn execute(&self, previous: Option<&PluginResult>) -> Result<PluginResult, PluginError> {
        (self.run)(previous)
    }
}
