use std::fmt;
use std::sync::Arc;

use crate::codec::{BincodeCodec, ValueCodec};
use crate::host::{self, FinalizerInstaller};
use crate::policy::{PickleFlags, PolicyConfig, PolicyError, PolicyRegistry};
use crate::registry::CodeRegistry;
use crate::vm::BYTECODE_VERSION;

/// Collaborators consulted by a capture or restore operation.
///
/// The default wires up the process-wide policy and code registries, the
/// bincode value codec and whatever finalizer installer the host has set when
/// the operation runs.
#[derive(Clone)]
pub struct EngineConfig {
    pub policy: Arc<PolicyRegistry>,
    pub codec: Arc<dyn ValueCodec>,
    pub registry: Arc<CodeRegistry>,
    /// `None` defers to [`host::current_finalizer_installer`].
    pub installer: Option<Arc<dyn FinalizerInstaller>>,
    /// Bytecode version tag the validator accepts.
    pub accepted_version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyRegistry::global(),
            codec: Arc::new(BincodeCodec),
            registry: CodeRegistry::global(),
            installer: None,
            accepted_version: BYTECODE_VERSION,
        }
    }
}

impl EngineConfig {
    /// Isolated configuration: private policy and code registries.
    pub fn isolated(flags: PickleFlags) -> Self {
        Self {
            policy: Arc::new(PolicyRegistry::new(flags)),
            registry: Arc::new(CodeRegistry::new()),
            ..Self::default()
        }
    }

    pub fn from_policy_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        let mut engine = Self::isolated(config.pickle_flags()?);
        if let Some(version) = config.accepted_version {
            engine.accepted_version = version;
        }
        Ok(engine)
    }

    pub fn with_policy(mut self, policy: Arc<PolicyRegistry>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the policy with a private registry holding `flags`.
    pub fn with_flags(self, flags: PickleFlags) -> Self {
        self.with_policy(Arc::new(PolicyRegistry::new(flags)))
    }

    pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_registry(mut self, registry: Arc<CodeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn FinalizerInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_accepted_version(mut self, version: u32) -> Self {
        self.accepted_version = version;
        self
    }

    pub(crate) fn installer(&self) -> Arc<dyn FinalizerInstaller> {
        self.installer
            .clone()
            .unwrap_or_else(host::current_finalizer_installer)
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("flags", &self.policy.get_flags())
            .field("codes", &self.registry.len())
            .field("custom_installer", &self.installer.is_some())
            .field("accepted_version", &self.accepted_version)
            .finish()
    }
}
