//! Identifiers for agents, users, packages, workflows and steps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypesError;

const CONTAINER_SHIFT: u32 = 64;
const SERVICE_SHIFT: u32 = 32;
const SERVICE_MASK: u128 = 0xFFFF_FFFF << SERVICE_SHIFT;
const PLUGIN_MASK: u128 = 0xFFFF_FFFF;

/// Structured 128-bit package identifier.
///
/// Layout, most significant bits first:
///
/// | bits    | segment   |
/// |---------|-----------|
/// | 127..64 | container |
/// | 63..32  | service   |
/// | 31..0   | plugin    |
///
/// A zero service or plugin segment addresses the whole container or service,
/// which is what access rules use to grant a package family at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId(pub Uuid);

impl PackageId {
    /// Assemble a package id from its three segments.
    pub fn from_parts(container: u64, service: u32, plugin: u32) -> Self {
        let value = ((container as u128) << CONTAINER_SHIFT)
            | ((service as u128) << SERVICE_SHIFT)
            | plugin as u128;
        Self(Uuid::from_u128(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    pub fn container(&self) -> u64 {
        (self.as_u128() >> CONTAINER_SHIFT) as u64
    }

    pub fn service(&self) -> u32 {
        ((self.as_u128() & SERVICE_MASK) >> SERVICE_SHIFT) as u32
    }

    pub fn plugin(&self) -> u32 {
        (self.as_u128() & PLUGIN_MASK) as u32
    }

    /// The id of the container this package lives in (service and plugin zeroed).
    pub fn container_id(&self) -> PackageId {
        Self::from_parts(self.container(), 0, 0)
    }

    /// The id of the service this package belongs to (plugin zeroed).
    pub fn service_id(&self) -> PackageId {
        Self::from_parts(self.container(), self.service(), 0)
    }

    pub fn is_container(&self) -> bool {
        self.service() == 0 && self.plugin() == 0
    }

    /// Whether `self`, read as a grant, covers `other`.
    ///
    /// Zero lower segments act as wildcards: a container id covers every
    /// service and plugin inside it, a service id covers its plugins.
    pub fn covers(&self, other: &PackageId) -> bool {
        if self.container() != other.container() {
            return false;
        }
        if self.service() == 0 && self.plugin() == 0 {
            return true;
        }
        if self.service() != other.service() {
            return false;
        }
        self.plugin() == 0 || self.plugin() == other.plugin()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}.{:08x}.{:08x}",
            self.container(),
            self.service(),
            self.plugin()
        )
    }
}

/// Discriminant of an [`EntityId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Agent,
    User,
    Package,
}

/// Identity of anything that can sign, receive, or be executed.
///
/// Equality and hashing are by (kind, value): an agent and a user that
/// happen to share the same 128-bit value are different entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityId {
    Agent(Uuid),
    User(Uuid),
    Package(PackageId),
}

impl EntityId {
    pub fn new_agent() -> Self {
        Self::Agent(Uuid::new_v4())
    }

    pub fn new_user() -> Self {
        Self::User(Uuid::new_v4())
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Agent(_) => EntityKind::Agent,
            Self::User(_) => EntityKind::User,
            Self::Package(_) => EntityKind::Package,
        }
    }

    pub fn value(&self) -> u128 {
        match self {
            Self::Agent(id) | Self::User(id) => id.as_u128(),
            Self::Package(pkg) => pkg.as_u128(),
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent(_))
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    pub fn as_package(&self) -> Option<PackageId> {
        match self {
            Self::Package(pkg) => Some(*pkg),
            _ => None,
        }
    }
}

impl From<PackageId> for EntityId {
    fn from(pkg: PackageId) -> Self {
        Self::Package(pkg)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "agent:{}", id),
            Self::User(id) => write!(f, "user:{}", id),
            Self::Package(pkg) => write!(f, "package:{}", pkg.0),
        }
    }
}

impl FromStr for EntityId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| TypesError::InvalidEntityId(s.to_string()))?;
        let uuid = Uuid::parse_str(value).map_err(|_| TypesError::InvalidEntityId(s.to_string()))?;
        match kind {
            "agent" => Ok(Self::Agent(uuid)),
            "user" => Ok(Self::User(uuid)),
            "package" => Ok(Self::Package(PackageId(uuid))),
            other => Err(TypesError::UnknownEntityKind(other.to_string())),
        }
    }
}

/// Identifier of a workflow; also the nonce tracker request id for first hops.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one step in a workflow's conditional step graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
