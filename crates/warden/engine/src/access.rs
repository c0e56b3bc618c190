//! Who may run what on an agent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_types::{EntityId, PackageId};

use crate::config::merge_configuration;
use crate::error::AccessError;

/// Grants `user` the right to run `package` and everything it covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub user: EntityId,
    pub package: PackageId,
}

/// Per-agent access rules and package configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    #[serde(default)]
    pub access_rules: Vec<AccessRule>,
    /// Users allowed to run any package on this agent.
    #[serde(default)]
    pub granted_access: Vec<EntityId>,
    /// Agent-side plugin configuration, keyed by container, service or plugin id.
    #[serde(default)]
    pub package_configuration: BTreeMap<PackageId, Value>,
}

impl AgentConfiguration {
    pub fn has_access(&self, user: &EntityId, package: &PackageId) -> bool {
        self.granted_access.contains(user)
            || self
                .access_rules
                .iter()
                .any(|rule| rule.user == *user && rule.package.covers(package))
    }

    /// Agent configuration for `package`, layered container, then service,
    /// then plugin.
    pub fn configuration_for(&self, package: &PackageId) -> Value {
        let mut layers = vec![package.container_id(), package.service_id(), *package];
        layers.dedup();
        layers
            .iter()
            .filter_map(|id| self.package_configuration.get(id))
            .fold(Value::Null, |acc, layer| match acc {
                Value::Null => layer.clone(),
                acc => merge_configuration(&acc, layer),
            })
    }
}

/// Source of agent configuration.
pub trait AccessRulesProvider: Send + Sync {
    fn get_configuration(&self, agent: &EntityId) -> Result<AgentConfiguration, AccessError>;
}
