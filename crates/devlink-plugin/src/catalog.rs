//! Plugin catalog.
//!
//! The catalog discovers components under a configured directory, loads each
//! one into its own [`IsolationContext`] through the first [`ComponentLoader`]
//! that accepts it, and indexes the resulting plugins by id.
//!
//! # Concurrency
//!
//! - The index sits behind an `RwLock`; lookups clone what they need and
//!   release the lock, so callers always work on a snapshot.
//! - Scans and reloads are serialized by a separate mutex and build their
//!   results before taking the write lock, so a slow scan never blocks
//!   lookups.
//!
//! # Replacement
//!
//! Registering an id that already exists replaces the entry. Devices created
//! by the replaced plugin keep working; the device manager holds the old
//! plugin and its context until those devices are dropped.

use crate::context::{ComponentSource, IsolationContext};
use crate::descriptor::{Plugin, PluginDescriptor};
use crate::loader::ComponentLoader;
use devlink_core::{DeviceType, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Catalog configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory scanned for components. `None` means in-process plugins only.
    pub directory: Option<PathBuf>,

    /// Descend into subdirectories.
    pub recursive: bool,
}

impl CatalogConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            recursive: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// A resolved plugin together with the context it lives in.
#[derive(Clone)]
pub struct CatalogEntry {
    pub plugin: Arc<dyn Plugin>,
    pub context: Arc<IsolationContext>,
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("plugin", &self.plugin.id())
            .field("context", &self.context.id())
            .field("source", self.context.source())
            .finish()
    }
}

/// A component that loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedComponent {
    pub path: PathBuf,
    pub plugin_ids: Vec<String>,
}

/// A component that was skipped, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedComponent {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a directory scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub loaded: Vec<LoadedComponent>,
    pub skipped: Vec<SkippedComponent>,
    /// Files no loader accepts.
    pub ignored: Vec<PathBuf>,
}

impl ScanReport {
    /// Number of plugins registered by the scan.
    pub fn plugin_count(&self) -> usize {
        self.loaded.iter().map(|c| c.plugin_ids.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Registry of plugins keyed by id.
pub struct PluginCatalog {
    config: CatalogConfig,
    loaders: Vec<Arc<dyn ComponentLoader>>,
    index: RwLock<HashMap<String, CatalogEntry>>,
    scan_lock: Mutex<()>,
    last_report: RwLock<ScanReport>,
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("config", &self.config)
            .field("loaders", &self.loaders.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("plugins", &self.len())
            .finish()
    }
}

impl PluginCatalog {
    /// Empty catalog. Add loaders, then call [`PluginCatalog::scan`].
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            loaders: Vec::new(),
            index: RwLock::new(HashMap::new()),
            scan_lock: Mutex::new(()),
            last_report: RwLock::new(ScanReport::default()),
        }
    }

    pub fn with_loader(mut self, loader: impl ComponentLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    /// Build a catalog and run the initial scan.
    pub fn open(config: CatalogConfig, loaders: Vec<Arc<dyn ComponentLoader>>) -> Result<Self> {
        let mut catalog = Self::new(config);
        catalog.loaders = loaders;
        catalog.scan()?;
        Ok(catalog)
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Discover components and register their plugins.
    ///
    /// Components that fail to load are skipped and listed in the returned
    /// report. Plugins previously loaded from files that are gone are
    /// removed; in-process registrations are kept.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when the configured directory cannot be read.
    pub fn scan(&self) -> Result<ScanReport> {
        let _scan = self.scan_lock.lock().unwrap_or_else(|e| e.into_inner());

        let Some(directory) = self.config.directory.as_deref() else {
            return Ok(ScanReport::default());
        };

        let mut files = Vec::new();
        collect_files(directory, self.config.recursive, &mut files)?;
        files.sort();

        let mut report = ScanReport::default();
        let mut loaded: Vec<(String, CatalogEntry)> = Vec::new();

        for path in files {
            let Some(loader) = self.loader_for(&path) else {
                debug!(path = %path.display(), "No loader accepts file, ignoring");
                report.ignored.push(path);
                continue;
            };

            match load_component(loader.as_ref(), &path) {
                Ok(entries) => {
                    report.loaded.push(LoadedComponent {
                        path: path.clone(),
                        plugin_ids: entries.iter().map(|(id, _)| id.clone()).collect(),
                    });
                    loaded.extend(entries);
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "Skipping plugin component");
                    report.skipped.push(SkippedComponent {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        {
            let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
            let previous = std::mem::take(&mut *index);
            let mut replaced = Vec::new();

            for (id, entry) in previous {
                if matches!(entry.context.source(), ComponentSource::InProcess) {
                    index.insert(id, entry);
                } else {
                    replaced.push(entry.context);
                }
            }
            for (id, entry) in loaded {
                if let Some(old) = insert_entry(&mut index, id, entry) {
                    replaced.push(old.context);
                }
            }
            discard_orphans(&index, replaced);
        }

        info!(
            directory = %directory.display(),
            plugins = report.plugin_count(),
            skipped = report.skipped.len(),
            ignored = report.ignored.len(),
            "Plugin scan complete"
        );

        *self.last_report.write().unwrap_or_else(|e| e.into_inner()) = report.clone();
        Ok(report)
    }

    /// Run discovery again. Same as [`PluginCatalog::scan`].
    pub fn rescan(&self) -> Result<ScanReport> {
        self.scan()
    }

    /// Report of the most recent scan.
    pub fn last_report(&self) -> ScanReport {
        self.last_report.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Register an in-process plugin in its own context.
    ///
    /// Returns the descriptor of the plugin it replaced, if any.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Option<PluginDescriptor> {
        let _scan = self.scan_lock.lock().unwrap_or_else(|e| e.into_inner());

        let id = plugin.id().to_string();
        let entry = CatalogEntry {
            plugin,
            context: Arc::new(IsolationContext::new(ComponentSource::InProcess)),
        };

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let previous = insert_entry(&mut index, id, entry);
        let replaced = previous.as_ref().map(|old| old.plugin.descriptor().clone());
        discard_orphans(&index, previous.map(|old| old.context));
        replaced
    }

    /// Load the component at `path` into a fresh context, replacing the
    /// plugins it declares.
    ///
    /// Unlike a scan, a failure is returned to the caller and the current
    /// entries stay in place.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let _scan = self.scan_lock.lock().unwrap_or_else(|e| e.into_inner());

        let loader = self.loader_for(path).ok_or_else(|| {
            Error::plugin_load(path.display().to_string(), "no loader accepts this component")
        })?;
        let entries = load_component(loader.as_ref(), path)?;
        let ids: Vec<String> = entries.iter().map(|(id, _)| id.clone()).collect();

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());

        // Plugins the previous version of this file declared but the new one drops.
        let source = ComponentSource::File(path.to_path_buf());
        let stale: Vec<String> = index
            .iter()
            .filter(|(id, entry)| entry.context.source() == &source && !ids.contains(id))
            .map(|(id, _)| id.clone())
            .collect();

        let mut replaced = Vec::new();
        for id in stale {
            if let Some(old) = index.remove(&id) {
                replaced.push(old.context);
            }
        }
        for (id, entry) in entries {
            if let Some(old) = insert_entry(&mut index, id, entry) {
                replaced.push(old.context);
            }
        }
        discard_orphans(&index, replaced);

        info!(path = %path.display(), plugins = ?ids, "Plugin component reloaded");
        Ok(ids)
    }

    /// Remove a plugin. Its context is discarded once no other plugin of the
    /// same component remains.
    pub fn unload(&self, id: &str) -> bool {
        let _scan = self.scan_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());

        match index.remove(id) {
            Some(entry) => {
                discard_orphans(&index, Some(entry.context));
                info!(plugin_id = %id, "Plugin unloaded");
                true
            }
            None => false,
        }
    }

    /// Look up a plugin by id.
    ///
    /// # Errors
    ///
    /// [`Error::PluginNotFound`] when no plugin is registered under `id`.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Plugin>> {
        self.entry(id).map(|entry| entry.plugin)
    }

    /// Look up a plugin and its context.
    pub fn entry(&self, id: &str) -> Result<CatalogEntry> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::plugin_not_found(id))
    }

    /// Plugins currently registered under `device_type`, ordered by id.
    ///
    /// The iterator owns a snapshot taken at call time; call again to see
    /// later changes.
    pub fn find_by_device_type(&self, device_type: &DeviceType) -> impl Iterator<Item = Arc<dyn Plugin>> + use<> {
        let mut matches: Vec<(String, Arc<dyn Plugin>)> = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, entry)| &entry.plugin.descriptor().device_type == device_type)
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.plugin)))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        matches.into_iter().map(|(_, plugin)| plugin)
    }

    /// Descriptors of every registered plugin, ordered by id.
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        let mut descriptors: Vec<PluginDescriptor> = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|entry| entry.plugin.descriptor().clone())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.read().unwrap_or_else(|e| e.into_inner()).contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn loader_for(&self, path: &Path) -> Option<Arc<dyn ComponentLoader>> {
        self.loaders.iter().find(|loader| loader.accepts(path)).cloned()
    }
}

fn collect_files(directory: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(directory).map_err(|e| {
        Error::configuration(format!(
            "Cannot read plugin directory {}: {e}",
            directory.display()
        ))
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if recursive && let Err(e) = collect_files(&path, true, files) {
                warn!(path = %path.display(), error = %e, "Skipping unreadable plugin subdirectory");
            }
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn load_component(loader: &dyn ComponentLoader, path: &Path) -> Result<Vec<(String, CatalogEntry)>> {
    let context = Arc::new(IsolationContext::new(ComponentSource::File(path.to_path_buf())));
    let plugins = loader.load(path, &context)?;
    if plugins.is_empty() {
        return Err(Error::plugin_load(path.display().to_string(), "component declares no plugins"));
    }

    debug!(path = %path.display(), loader = loader.name(), plugins = plugins.len(), "Component loaded");
    Ok(plugins
        .into_iter()
        .map(|plugin| {
            let id = plugin.id().to_string();
            let entry = CatalogEntry {
                plugin,
                context: Arc::clone(&context),
            };
            (id, entry)
        })
        .collect())
}

fn insert_entry(
    index: &mut HashMap<String, CatalogEntry>,
    id: String,
    entry: CatalogEntry,
) -> Option<CatalogEntry> {
    let source = entry.context.source().clone();
    let previous = index.insert(id.clone(), entry);
    if let Some(old) = &previous {
        warn!(
            plugin_id = %id,
            previous = %old.context.source(),
            source = %source,
            "Plugin id registered again, replacing"
        );
    }
    previous
}

/// Discard each context that no entry references anymore.
fn discard_orphans(
    index: &HashMap<String, CatalogEntry>,
    contexts: impl IntoIterator<Item = Arc<IsolationContext>>,
) {
    for context in contexts {
        let in_use = index
            .values()
            .any(|entry| Arc::ptr_eq(&entry.context, &context));
        if !in_use {
            context.discard();
        }
    }
}
