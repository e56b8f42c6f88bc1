//! Isolation contexts.
//!
//! Every component is loaded into its own [`IsolationContext`]. Plugins from
//! one component share it; nothing is shared across components. The context
//! stays alive as long as anything references it: catalog entries, and the
//! device manager's records of devices created by those plugins. Unloading a
//! component discards the context, which stops it from being resolved again
//! but leaves live devices untouched until they are dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Where a component came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ComponentSource {
    /// Registered in-process by the host.
    InProcess,
    /// Loaded from a file.
    File(PathBuf),
}

impl ComponentSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InProcess => None,
            Self::File(path) => Some(path),
        }
    }
}

impl fmt::Display for ComponentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess => f.write_str("in-process"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Execution context owning the plugins of one component.
#[derive(Debug)]
pub struct IsolationContext {
    id: u64,
    source: ComponentSource,
    loaded_at: DateTime<Utc>,
    discarded: AtomicBool,
}

impl IsolationContext {
    pub fn new(source: ComponentSource) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(context = id, source = %source, "Isolation context created");
        Self {
            id,
            source,
            loaded_at: Utc::now(),
            discarded: AtomicBool::new(false),
        }
    }

    /// Process-unique context number.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &ComponentSource {
        &self.source
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Mark the context as unloaded.
    pub fn discard(&self) {
        if !self.discarded.swap(true, Ordering::AcqRel) {
            debug!(context = self.id, source = %self.source, "Isolation context discarded");
        }
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        debug!(context = self.id, source = %self.source, "Isolation context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_distinct() {
        let a = IsolationContext::new(ComponentSource::InProcess);
        let b = IsolationContext::new(ComponentSource::File(PathBuf::from("/tmp/x.plugin.json")));
        assert_ne!(a.id(), b.id());
        assert_eq!(b.source().path(), Some(Path::new("/tmp/x.plugin.json")));
        assert_eq!(a.source().to_string(), "in-process");
    }

    #[test]
    fn test_discard() {
        let context = IsolationContext::new(ComponentSource::InProcess);
        assert!(!context.is_discarded());
        context.discard();
        context.discard();
        assert!(context.is_discarded());
    }
}
