//! Component loading boundary.

use crate::context::IsolationContext;
use crate::descriptor::Plugin;
use devlink_core::Result;
use std::path::Path;
use std::sync::Arc;

/// Loads plugins out of one kind of component file.
///
/// The loader is the isolation boundary: only the [`Plugin`] contract crosses
/// it. A loader for manifests, for shared libraries or for out-of-process
/// plugins all fit behind this trait.
pub trait ComponentLoader: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether `path` looks like a component this loader handles.
    fn accepts(&self, path: &Path) -> bool;

    /// Load every plugin in the component at `path`.
    ///
    /// The returned plugins belong to `context`. A component either loads
    /// completely or fails as a whole.
    fn load(&self, path: &Path, context: &Arc<IsolationContext>) -> Result<Vec<Arc<dyn Plugin>>>;
}
