//! Hooks supplied by the hosting environment.
//!
//! The host decides which finalizer an asynchronous generator receives when
//! it is first iterated. Restore asks the *currently* configured installer
//! again, so a restored generator is finalized by whatever the restoring
//! process has set up rather than by a stale reference.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::value::Finalizer;

pub trait FinalizerInstaller: Send + Sync {
    /// Called once per asynchronous generator; `None` means "no finalizer".
    fn install(&self) -> Option<Finalizer>;
}

/// Installer used until the host configures one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFinalizer;

impl FinalizerInstaller for NoFinalizer {
    fn install(&self) -> Option<Finalizer> {
        None
    }
}

/// Hands out finalizers with the same name and a fresh token each time.
#[derive(Debug)]
pub struct NamedFinalizer {
    name: String,
    next_token: AtomicU64,
}

impl NamedFinalizer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Number of finalizers handed out so far.
    pub fn installed(&self) -> u64 {
        self.next_token.load(Ordering::SeqCst) - 1
    }
}

impl FinalizerInstaller for NamedFinalizer {
    fn install(&self) -> Option<Finalizer> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        Some(Finalizer::new(self.name.clone(), token))
    }
}

impl fmt::Debug for dyn FinalizerInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FinalizerInstaller")
    }
}

static INSTALLER: Lazy<RwLock<Arc<dyn FinalizerInstaller>>> =
    Lazy::new(|| RwLock::new(Arc::new(NoFinalizer)));

/// Replaces the process-wide installer and returns the previous one.
pub fn set_finalizer_installer(
    installer: Arc<dyn FinalizerInstaller>,
) -> Arc<dyn FinalizerInstaller> {
    std::mem::replace(&mut *INSTALLER.write(), installer)
}

pub fn current_finalizer_installer() -> Arc<dyn FinalizerInstaller> {
    INSTALLER.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_finalizer_hands_out_fresh_tokens() {
        let installer = NamedFinalizer::new("aclose");
        let first = installer.install().expect("first");
        let second = installer.install().expect("second");
        assert_eq!(first.name, second.name);
        assert_ne!(first.token, second.token);
        assert_eq!(installer.installed(), 2);
    }

    #[test]
    fn default_installer_declines() {
        assert_eq!(NoFinalizer.install(), None);
    }
}
