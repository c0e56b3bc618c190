//! A small agent network wired to shared in-memory services.
//!
//! Every agent gets its own [`WorkflowEngine`]; keys, packages, access rules,
//! transport, nonce tracker and tripwire are shared, so a test can drive a
//! workflow from hop to hop and inspect everything that was sent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;
use warden_crypto::{ChainSigned, Encryptable, EncryptedMessageEnvelope, InMemoryKeyring, SignedObject};
use warden_engine::{
    CachingPackageLoader, EngineConfig, EngineServices, FnPlugin, InMemoryPackageSource,
    InMemoryTransport, PackageManifest, Plugin, PluginError, PluginRegistry, ProcessingOutcome,
    StaticAccessRules, WorkflowEngine,
};
use warden_nonce::InMemoryNonceTracker;
use warden_steps::{ExecutionStepCollection, WorkflowExecutionMessage, WorkflowReceipt};
use warden_tripwire::{AuditTrail, Tripwire};
use warden_types::{EntityId, PackageId, PluginResult};

/// Signed container holding every test plugin.
pub const TOOLS_CONTAINER: u64 = 0x77;

/// Container published by a publisher nobody trusts.
pub const ROGUE_CONTAINER: u64 = 0x88;

pub const TOOLS_CONTENT: &[u8] = b"warden test tools 1.0.0";

/// Succeeds with a public `rotated` output and a secure `key`.
pub fn rotate() -> PackageId {
    PackageId::from_parts(TOOLS_CONTAINER, 1, 1)
}

/// Always fails.
pub fn fail() -> PackageId {
    PackageId::from_parts(TOOLS_CONTAINER, 1, 2)
}

/// Reports the result code from its `code` argument (default `Success`) and
/// echoes the parent's secure `key` as public `saw_key`.
pub fn echo() -> PackageId {
    PackageId::from_parts(TOOLS_CONTAINER, 2, 1)
}

pub fn rogue() -> PackageId {
    PackageId::from_parts(ROGUE_CONTAINER, 1, 1)
}

fn tools_registry() -> Arc<PluginRegistry> {
    let registry = PluginRegistry::new();
    registry
        .register(rotate(), |_: &Value| {
            Ok(Box::new(FnPlugin::new(|_| {
                Ok(PluginResult::success()
                    .with_output("rotated", json!(true))
                    .with_secure_output("key", json!("s3cret")))
            })) as Box<dyn Plugin>)
        })
        .expect("register rotate");
    registry
        .register(fail(), |_: &Value| {
            Ok(Box::new(FnPlugin::new(|_| {
                Err(PluginError::Execution("simulated failure".into()))
            })) as Box<dyn Plugin>)
        })
        .expect("register fail");
    registry
        .register(echo(), |config: &Value| {
            let code = config
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(warden_types::RESULT_SUCCESS)
                .to_string();
            Ok(Box::new(FnPlugin::new(move |previous| {
                let saw = previous
                    .and_then(|p| p.secure_outputs.get("key"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(PluginResult::with_code(code.clone()).with_output("saw_key", saw))
            })) as Box<dyn Plugin>)
        })
        .expect("register echo");
    Arc::new(registry)
}

/// Options for harness construction.
pub struct HarnessOptions {
    pub agents: usize,
    pub config: EngineConfig,
    /// Grant the workflow user access to everything on every agent.
    pub grant_all: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            agents: 3,
            config: EngineConfig::default(),
            grant_all: true,
        }
    }
}

pub struct Harness {
    pub keyring: Arc<InMemoryKeyring>,
    pub user: EntityId,
    pub agents: Vec<EntityId>,
    pub loader: Arc<CachingPackageLoader<InMemoryPackageSource>>,
    pub access: Arc<StaticAccessRules>,
    pub transport: Arc<InMemoryTransport>,
    pub nonces: Arc<InMemoryNonceTracker>,
    pub tripwire: Arc<Tripwire>,
    pub audit: Arc<AuditTrail>,
    engines: HashMap<EntityId, WorkflowEngine>,
}

impl Harness {
    pub fn new(opts: HarnessOptions) -> Self {
        let keyring = Arc::new(InMemoryKeyring::new());
        let user = keyring.generate_user().expect("user keys");
        let publisher = keyring.generate_user().expect("publisher keys");
        let stranger = keyring.generate_user().expect("stranger keys");

        let source = InMemoryPackageSource::new(keyring.clone());
        source.trust_publisher(publisher).expect("trust publisher");

        let mut tools = PackageManifest::new(rotate(), "test-tools", "1.0.0", TOOLS_CONTENT)
            .with_plugin(rotate())
            .with_plugin(fail())
            .with_plugin(echo());
        tools
            .append_signature(keyring.as_ref(), publisher, "publisher")
            .expect("sign tools manifest");
        source
            .publish(tools, TOOLS_CONTENT.to_vec(), tools_registry())
            .expect("publish tools");

        let rogue_registry = Arc::new(PluginRegistry::new());
        rogue_registry
            .register(rogue(), |_: &Value| {
                Ok(Box::new(FnPlugin::new(|_| Ok(PluginResult::success()))) as Box<dyn Plugin>)
            })
            .expect("register rogue");
        let mut rogue_manifest = PackageManifest::new(rogue(), "rogue", "6.6.6", b"rogue")
            .with_plugin(rogue());
        rogue_manifest
            .append_signature(keyring.as_ref(), stranger, "stranger")
            .expect("sign rogue manifest");
        source
            .publish(rogue_manifest, b"rogue".to_vec(), rogue_registry)
            .expect("publish rogue");

        let loader = Arc::new(CachingPackageLoader::new(source));
        let access = Arc::new(StaticAccessRules::new());
        let transport = Arc::new(InMemoryTransport::new());
        let nonces = Arc::new(opts.config.nonce.tracker());
        let audit = Arc::new(AuditTrail::new());
        let tripwire = Arc::new(Tripwire::new().with_observer(audit.clone()));

        let mut agents = Vec::with_capacity(opts.agents);
        let mut engines = HashMap::new();
        for i in 0..opts.agents {
            let agent = keyring.generate_agent().expect("agent keys");
            if opts.grant_all {
                access.grant_all(agent, user);
            }
            let services = EngineServices {
                agent,
                agent_display: format!("agent-{i}"),
                crypto: keyring.clone(),
                nonces: nonces.clone(),
                packages: loader.clone(),
                access: access.clone(),
                transport: transport.clone(),
                tripwire: tripwire.clone(),
                config: opts.config.clone(),
            };
            engines.insert(agent, WorkflowEngine::new(services));
            agents.push(agent);
        }

        Self {
            keyring,
            user,
            agents,
            loader,
            access,
            transport,
            nonces,
            tripwire,
            audit,
            engines,
        }
    }

    pub fn agent(&self, index: usize) -> EntityId {
        self.agents[index]
    }

    /// Build and sign a workflow as the harness user.
    pub fn sign_workflow(&self, steps: ExecutionStepCollection) -> WorkflowExecutionMessage {
        self.sign(WorkflowExecutionMessage::new(self.user, steps))
    }

    /// (Re)sign a prepared workflow as the harness user.
    pub fn sign(&self, mut msg: WorkflowExecutionMessage) -> WorkflowExecutionMessage {
        msg.sign(self.keyring.as_ref(), self.user, "user")
            .expect("sign workflow");
        msg
    }

    pub fn seal(&self, msg: &WorkflowExecutionMessage, recipient: EntityId) -> EncryptedMessageEnvelope {
        msg.seal_for(self.keyring.as_ref(), &recipient, Uuid::new_v4())
            .expect("seal workflow")
    }

    /// Seal the first hop for the running entity of the first root step.
    pub fn first_hop(&self, msg: &WorkflowExecutionMessage) -> EncryptedMessageEnvelope {
        let root = msg.current_step().expect("workflow has a root step");
        self.seal(msg, root.running_entity)
    }

    pub fn open(&self, envelope: &EncryptedMessageEnvelope) -> WorkflowExecutionMessage {
        envelope
            .payload
            .decrypt(self.keyring.as_ref(), &envelope.recipient())
            .expect("open workflow message")
    }

    /// Hand an envelope to the engine of its recipient.
    pub async fn deliver(&self, envelope: EncryptedMessageEnvelope) -> ProcessingOutcome {
        let recipient = envelope.recipient();
        self.deliver_to(recipient, envelope).await
    }

    /// Hand an envelope to a specific agent, whoever it is addressed to.
    pub async fn deliver_to(&self, agent: EntityId, envelope: EncryptedMessageEnvelope) -> ProcessingOutcome {
        let engine = self.engines.get(&agent).expect("envelope for a known agent");
        engine.process(envelope).await
    }

    /// Remove and return everything sent to `agent`.
    pub fn take_for(&self, agent: EntityId) -> Vec<EncryptedMessageEnvelope> {
        self.transport.take_for(&agent)
    }

    /// Deliver `envelope`, then every forwarded step, until the network is quiet.
    pub async fn run(&self, envelope: EncryptedMessageEnvelope) -> Vec<ProcessingOutcome> {
        let mut pending = VecDeque::from([envelope]);
        let mut outcomes = Vec::new();
        while let Some(next) = pending.pop_front() {
            let outcome = self.deliver(next).await;
            debug!(phase = %outcome.phase, abort = ?outcome.abort, "Hop processed");
            outcomes.push(outcome);
            for agent in &self.agents {
                pending.extend(self.transport.take_for(agent));
            }
        }
        outcomes
    }

    /// Decrypt and drain every workflow receipt sent to the user.
    pub fn workflow_receipts(&self) -> Vec<WorkflowReceipt> {
        self.transport
            .take_for(&self.user)
            .iter()
            .map(|envelope| {
                envelope
                    .payload
                    .decrypt(self.keyring.as_ref(), &self.user)
                    .expect("open workflow receipt")
            })
            .collect()
    }

    /// The completed workflow receipt among those sent to the user.
    pub fn final_receipt(&self) -> Option<WorkflowReceipt> {
        self.workflow_receipts().into_iter().find(|r| r.complete)
    }
}
