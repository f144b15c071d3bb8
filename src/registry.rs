use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::vm::CodeObject;

/// Code descriptors known to this process, keyed by [`CodeObject::key`].
#[derive(Debug, Default)]
pub struct CodeRegistry {
    codes: RwLock<HashMap<String, Arc<CodeObject>>>,
}

static GLOBAL: Lazy<Arc<CodeRegistry>> = Lazy::new(|| Arc::new(CodeRegistry::new()));

impl CodeRegistry {
    pub fn new() -> Self {
        Self {
            codes: RwLock::new(HashMap::new()),
        }
    }

    pub fn global() -> Arc<CodeRegistry> {
        GLOBAL.clone()
    }

    /// Registers `code` and its nested routines. Existing keys are replaced;
    /// the previous descriptor for `code`'s own key is returned.
    pub fn register(&self, code: Arc<CodeObject>) -> Option<Arc<CodeObject>> {
        let mut codes = self.codes.write();
        let mut pending: Vec<Arc<CodeObject>> = code.children().to_vec();
        while let Some(child) = pending.pop() {
            pending.extend(child.children().iter().cloned());
            codes.insert(child.key().to_string(), child);
        }
        codes.insert(code.key().to_string(), code)
    }

    /// Registers `code` only when its key is unknown.
    pub(crate) fn register_if_absent(&self, code: &Arc<CodeObject>) {
        self.codes
            .write()
            .entry(code.key().to_string())
            .or_insert_with(|| code.clone());
    }

    pub fn resolve(&self, key: &str) -> Option<Arc<CodeObject>> {
        self.codes.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.codes.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.codes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.read().is_empty()
    }
}
