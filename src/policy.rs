//! Process-wide pickle flags.
//!
//! Capture and restore read the flags exactly once per call through
//! [`PolicyRegistry::snapshot`], so a concurrent [`set_flags`] never produces
//! a half-old, half-new blob.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding a comma separated list of flag names.
pub const FLAGS_ENV: &str = "SOLVRA_PICKLE_FLAGS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown pickle flag '{0}'")]
    UnknownFlag(String),
    #[error("unknown pickle flag bits {0:#04x}")]
    UnknownBits(u8),
    #[error("invalid policy config: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PickleFlags(u8);

impl PickleFlags {
    pub const NONE: PickleFlags = PickleFlags(0);
    /// Embed the async-generator finalizer by value.
    pub const PRESERVE_FINALIZER: PickleFlags = PickleFlags(1 << 0);
    /// Leave async-generator finalizers uninitialized after restore.
    pub const RESET_FINALIZER: PickleFlags = PickleFlags(1 << 1);
    /// Embed the task's ambient context.
    pub const INCLUDE_CONTEXT: PickleFlags = PickleFlags(1 << 2);

    const KNOWN: u8 = 0b111;

    const NAMES: [(PickleFlags, &'static str); 3] = [
        (PickleFlags::PRESERVE_FINALIZER, "preserve-finalizer"),
        (PickleFlags::RESET_FINALIZER, "reset-finalizer"),
        (PickleFlags::INCLUDE_CONTEXT, "include-context"),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Result<Self, PolicyError> {
        if bits & !Self::KNOWN != 0 {
            return Err(PolicyError::UnknownBits(bits));
        }
        Ok(PickleFlags(bits))
    }

    pub const fn contains(self, other: PickleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn with(self, other: PickleFlags) -> Self {
        PickleFlags(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: PickleFlags) -> Self {
        PickleFlags(self.0 & !other.0)
    }

    /// Every configurable flag with its name, in declaration order.
    pub fn all() -> impl Iterator<Item = (PickleFlags, &'static str)> {
        Self::NAMES.into_iter()
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::all()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
            .collect()
    }

    pub fn from_name(name: &str) -> Result<Self, PolicyError> {
        let needle = name.trim();
        Self::all()
            .find(|(_, known)| known.eq_ignore_ascii_case(needle))
            .map(|(flag, _)| flag)
            .ok_or_else(|| PolicyError::UnknownFlag(needle.to_string()))
    }
}

impl BitOr for PickleFlags {
    type Output = PickleFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.with(rhs)
    }
}

impl BitOrAssign for PickleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.with(rhs);
    }
}

impl FromStr for PickleFlags {
    type Err = PolicyError;

    /// Parses `"preserve-finalizer, include-context"`; empty means none.
    fn from_str(list: &str) -> Result<Self, Self::Err> {
        list.split(',')
            .filter(|name| !name.trim().is_empty())
            .try_fold(PickleFlags::NONE, |flags, name| {
                Ok(flags | PickleFlags::from_name(name)?)
            })
    }
}

impl fmt::Display for PickleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

/// Holder of the flags consulted by capture and restore.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    flags: AtomicU8,
}

static GLOBAL: Lazy<Arc<PolicyRegistry>> = Lazy::new(|| Arc::new(PolicyRegistry::default()));

impl PolicyRegistry {
    pub fn new(flags: PickleFlags) -> Self {
        Self {
            flags: AtomicU8::new(flags.bits()),
        }
    }

    pub fn global() -> Arc<PolicyRegistry> {
        GLOBAL.clone()
    }

    /// Registry seeded from [`FLAGS_ENV`], defaulting to no flags.
    pub fn from_env() -> Result<Self, PolicyError> {
        match std::env::var(FLAGS_ENV) {
            Ok(list) => Ok(Self::new(list.parse()?)),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(err) => Err(PolicyError::Config(format!("{FLAGS_ENV}: {err}"))),
        }
    }

    pub fn set_flags(&self, flags: PickleFlags) {
        self.flags.store(flags.bits(), Ordering::SeqCst);
    }

    pub fn get_flags(&self) -> PickleFlags {
        PickleFlags(self.flags.load(Ordering::SeqCst))
    }

    /// The flags a single capture or restore operation works with.
    pub fn snapshot(&self) -> PickleFlags {
        self.get_flags()
    }
}

pub fn set_flags(flags: PickleFlags) {
    PolicyRegistry::global().set_flags(flags);
}

pub fn get_flags() -> PickleFlags {
    PolicyRegistry::global().get_flags()
}

/// Serializable policy settings, typically loaded from a TOML file:
///
/// ```toml
/// flags = ["preserve-finalizer"]
/// accepted_version = 3
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub flags: Vec<String>,
    /// Bytecode generation the validator accepts; defaults to the runtime's.
    #[serde(default)]
    pub accepted_version: Option<u32>,
}

impl PolicyConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, PolicyError> {
        toml::from_str(source).map_err(|err| PolicyError::Config(err.to_string()))
    }

    /// Flags from [`FLAGS_ENV`]; the accepted version is left at its default.
    pub fn from_env() -> Result<Self, PolicyError> {
        let flags = PolicyRegistry::from_env()?.get_flags();
        Ok(Self {
            flags: flags.names().into_iter().map(String::from).collect(),
            accepted_version: None,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, PolicyError> {
        toml::to_string(self).map_err(|err| PolicyError::Config(err.to_string()))
    }

    pub fn pickle_flags(&self) -> Result<PickleFlags, PolicyError> {
        self.flags
            .iter()
            .try_fold(PickleFlags::NONE, |flags, name| {
                Ok(flags | PickleFlags::from_name(name)?)
            })
    }

    pub fn apply(&self, registry: &PolicyRegistry) -> Result<(), PolicyError> {
        registry.set_flags(self.pickle_flags()?);
        Ok(())
    }
}
