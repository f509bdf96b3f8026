//! Plugin host (C15).
//!
//! Plugins observe and optionally rewrite ingestion events. Each plugin
//! implements [`Plugin`]; hooks are invoked for every registered plugin in
//! turn and wrapped in a fault barrier (`catch_unwind`) so one plugin
//! panicking never aborts ingestion or takes down its neighbours.
//!
//! Two registration paths exist: `PluginRegistry::register` for
//! in-process plugins (used by tests and single-binary deployments), and
//! `PluginRegistry::load_dir` which scans a directory for compiled cdylibs
//! and resolves the `plugin_entry` symbol declared by [`declare_plugin`].

use common::error::AppError;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{error, info, warn};

/// Final counters reported to `on_ingest_complete`.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub image_count: i64,
    pub annotation_count: i64,
    pub category_count: i64,
}

/// A plugin observes ingestion lifecycle events. All methods have a
/// no-op default so a plugin only needs to implement the hooks it cares
/// about.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn on_activate(&self) {}

    fn on_deactivate(&self) {}

    fn on_ingest_start(&self, _dataset_id: &str) {}

    /// Returns a possibly-modified sample record. Default is identity.
    fn on_sample_ingested(&self, sample: Value) -> Value {
        sample
    }

    fn on_ingest_complete(&self, _dataset_id: &str, _stats: &IngestStats) {}
}

/// Function signature every plugin cdylib must export as `plugin_entry`.
pub type PluginCreate = unsafe fn() -> *mut dyn Plugin;

/// Implement this in a plugin crate compiled as a `cdylib` to make it
/// loadable by [`PluginRegistry::load_dir`].
///
/// ```ignore
/// struct MyPlugin;
/// impl plugins::Plugin for MyPlugin { fn name(&self) -> &str { "my-plugin" } }
/// plugins::declare_plugin!(MyPlugin, MyPlugin);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty, $constructor:path) => {
        #[no_mangle]
        pub extern "C" fn plugin_entry() -> *mut dyn $crate::Plugin {
            let constructor: fn() -> $plugin_type = $constructor;
            let object = constructor();
            let boxed: Box<dyn $crate::Plugin> = Box::new(object);
            Box::into_raw(boxed)
        }
    };
}

/// Keeps a loaded dynamic library alive for as long as the plugin
/// instance it produced is in use; dropping it would unmap code the
/// plugin's vtable still points at.
struct LoadedLibrary {
    #[allow(dead_code)]
    library: libloading::Library,
}

/// Registry of active plugins, populated via static in-process
/// registration or dynamic loading from a configured directory.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
    libraries: Vec<LoadedLibrary>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-process plugin and fires `on_activate` for it.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.call_guarded(plugin.as_ref(), "on_activate", || plugin.on_activate());
        self.plugins.push(plugin);
    }

    /// Scans every immediate subdirectory of `dir` for a loadable cdylib
    /// exposing `plugin_entry`, loads it, and registers the resulting
    /// plugin. A subdirectory with no loadable library is skipped with a
    /// warning, not an error: plugin directories commonly hold source
    /// trees alongside build artefacts.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, AppError> {
        let mut loaded = 0usize;
        let entries = std::fs::read_dir(dir)
            .map_err(|e| AppError::Internal(format!("reading plugin dir {dir:?}: {e}")))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| AppError::Internal(format!("reading plugin dir entry: {e}")))?;
            if !entry.path().is_dir() {
                continue;
            }
            match find_cdylib(&entry.path()) {
                Some(lib_path) => match self.load_library(&lib_path) {
                    Ok(()) => loaded += 1,
                    Err(e) => warn!(path = %lib_path.display(), error = %e, "failed to load plugin"),
                },
                None => warn!(dir = %entry.path().display(), "no loadable plugin library found"),
            }
        }
        Ok(loaded)
    }

    fn load_library(&mut self, path: &Path) -> Result<(), AppError> {
        // SAFETY: the caller configures `plugin_dir` and is trusted to
        // point it at plugins built against this same `Plugin` ABI.
        let library = unsafe {
            libloading::Library::new(path)
                .map_err(|e| AppError::Internal(format!("loading {path:?}: {e}")))?
        };
        let constructor: libloading::Symbol<PluginCreate> = unsafe {
            library
                .get(b"plugin_entry")
                .map_err(|e| AppError::Internal(format!("missing plugin_entry in {path:?}: {e}")))?
        };
        let raw = unsafe { constructor() };
        let plugin = unsafe { Box::from_raw(raw) };
        info!(name = plugin.name(), path = %path.display(), "loaded plugin");
        self.call_guarded(plugin.as_ref(), "on_activate", || plugin.on_activate());
        self.plugins.push(plugin);
        self.libraries.push(LoadedLibrary { library });
        Ok(())
    }

    fn call_guarded<F: FnOnce() + std::panic::UnwindSafe>(
        &self,
        plugin: &dyn Plugin,
        hook: &str,
        f: F,
    ) {
        if let Err(panic) = catch_unwind(f) {
            error!(
                plugin = plugin.name(),
                hook,
                panic = %panic_message(&panic),
                "plugin hook panicked; isolated"
            );
        }
    }

    pub fn ingest_start(&self, dataset_id: &str) {
        for plugin in &self.plugins {
            self.call_guarded(plugin.as_ref(), "on_ingest_start", || {
                plugin.on_ingest_start(dataset_id)
            });
        }
    }

    /// Runs `on_sample_ingested` through every plugin in registration
    /// order, threading the (possibly rewritten) sample through each.
    pub fn sample_ingested(&self, sample: Value) -> Value {
        let mut current = sample;
        for plugin in &self.plugins {
            let plugin = plugin.as_ref();
            let input = current.clone();
            let result = catch_unwind(AssertUnwindSafe(|| plugin.on_sample_ingested(input)));
            match result {
                Ok(v) => current = v,
                Err(panic) => {
                    error!(
                        plugin = plugin.name(),
                        hook = "on_sample_ingested",
                        panic = %panic_message(&panic),
                        "plugin hook panicked; sample left unmodified"
                    );
                }
            }
        }
        current
    }

    pub fn ingest_complete(&self, dataset_id: &str, stats: &IngestStats) {
        for plugin in &self.plugins {
            self.call_guarded(plugin.as_ref(), "on_ingest_complete", || {
                plugin.on_ingest_complete(dataset_id, stats)
            });
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        for plugin in &self.plugins {
            self.call_guarded(plugin.as_ref(), "on_deactivate", || plugin.on_deactivate());
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn find_cdylib(dir: &Path) -> Option<std::path::PathBuf> {
    const EXTENSIONS: &[&str] = &["so", "dylib", "dll"];
    walkdir::WalkDir::new(dir)
        .max_depth(3)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| EXTENSIONS.contains(&ext))
        })
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingPlugin {
        starts: Arc<AtomicUsize>,
    }

    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_ingest_start(&self, _dataset_id: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_sample_ingested(&self, sample: Value) -> Value {
            let mut sample = sample;
            if let Some(obj) = sample.as_object_mut() {
                obj.insert("touched".to_string(), Value::Bool(true));
            }
            sample
        }
    }

    struct PanickingPlugin;

    impl Plugin for PanickingPlugin {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_ingest_start(&self, _dataset_id: &str) {
            panic!("boom");
        }
    }

    #[test]
    fn registered_plugin_receives_ingest_start() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(CountingPlugin {
            starts: starts.clone(),
        }));
        registry.ingest_start("d1");
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sample_ingested_rewrites_through_registered_plugins() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(CountingPlugin {
            starts: Arc::new(AtomicUsize::new(0)),
        }));
        let result = registry.sample_ingested(serde_json::json!({"id": "s1"}));
        assert_eq!(result["touched"], true);
    }

    #[test]
    fn panicking_plugin_does_not_abort_dispatch() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(PanickingPlugin));
        registry.register(Box::new(CountingPlugin {
            starts: starts.clone(),
        }));
        registry.ingest_start("d1");
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_registry_reports_empty() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
