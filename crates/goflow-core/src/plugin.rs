//! Handler plugins.
//!
//! Handlers reach a worker process in one of two ways:
//!
//! - [`StaticPlugins`]: a set of `(key, factory)` pairs compiled into the binary
//!   and chosen at build time. No unsafe code involved.
//! - Shared objects (feature `dynamic-plugins`): every file in a plugin
//!   directory ending in the platform's library suffix is opened, its ABI tag is
//!   checked, and its `NewHandler` factory is called. The file stem becomes the
//!   task type, so `doubler.so` serves tasks of type `doubler`.
//!
//! Loading is all-or-nothing: the registry is only touched after every plugin
//! has been resolved.
//!
//! A plugin crate is a `cdylib` that exports both symbols with [`export_handler!`]:
//!
//! ```ignore
//! goflow_core::export_handler!(goflow_core::handler_fn(|p| async move {
//!     goflow_core::TaskResult::ok(p)
//! }));
//! ```
//!
//! Plugins run arbitrary native code in the worker process and pass Rust trait
//! objects across the library boundary, so they must be built with the same
//! compiler and the same `goflow-core` version as the host.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::handler::{HandlerRegistry, SharedHandler};

/// Bumped whenever the plugin boundary changes shape.
pub const PLUGIN_ABI_VERSION: u32 = 1;
/// Factory symbol every plugin exports: `fn() -> SharedHandler`.
pub const NEW_HANDLER_SYMBOL: &str = "NewHandler";
/// ABI tag symbol every plugin exports: a `u32` equal to [`PLUGIN_ABI_VERSION`].
pub const ABI_VERSION_SYMBOL: &str = "GOFLOW_PLUGIN_ABI_VERSION";

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to read plugin directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to load plugins from {path}: {reason}")]
    InsecureDirectory { path: PathBuf, reason: String },
    #[error("failed to open plugin {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("plugin {path} does not export `{symbol}`: {reason}")]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        reason: String,
    },
    #[error("plugin {path} was built for ABI {found}, host expects {expected}")]
    AbiMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("duplicate plugin key '{0}'")]
    DuplicateKey(String),
}

/// Registry key for a plugin file: its file name without the library suffix.
pub fn plugin_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(std::env::consts::DLL_SUFFIX)?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Regular files in `dir` carrying the platform's shared-library suffix, sorted by path.
pub fn discover_plugins(dir: &Path) -> Result<Vec<PathBuf>, PluginError> {
    let read_err = |source| PluginError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        if !entry.file_type().map_err(read_err)?.is_file() {
            continue;
        }
        let path = entry.path();
        if plugin_key(&path).is_some() {
            found.push(path);
        }
    }
    found.sort();
    debug!(dir = %dir.display(), count = found.len(), "discovered plugins");
    Ok(found)
}

fn ensure_unique(handlers: &[(String, SharedHandler)]) -> Result<(), PluginError> {
    let mut seen = HashSet::new();
    for (key, _) in handlers {
        if !seen.insert(key.as_str()) {
            return Err(PluginError::DuplicateKey(key.clone()));
        }
    }
    Ok(())
}

/// Factory producing a fresh handler, the static counterpart of `NewHandler`.
pub type HandlerFactory = fn() -> SharedHandler;

/// A build-time selected set of handler factories.
#[derive(Clone, Default)]
pub struct StaticPlugins {
    entries: Vec<(String, HandlerFactory)>,
}

impl StaticPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, factory: HandlerFactory) -> Self {
        self.entries.push((key.into(), factory));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate every handler and register them together.
    pub async fn register_into(&self, registry: &HandlerRegistry) -> Result<usize, PluginError> {
        let handlers: Vec<(String, SharedHandler)> = self
            .entries
            .iter()
            .map(|(key, factory)| (key.clone(), factory()))
            .collect();
        ensure_unique(&handlers)?;
        let count = handlers.len();
        registry.extend(handlers).await;
        info!(count, "registered static plugins");
        Ok(count)
    }
}

#[cfg(feature = "dynamic-plugins")]
pub use dynamic::{load_plugins, load_plugins_into};

#[cfg(feature = "dynamic-plugins")]
mod dynamic {
    use super::*;
    use crate::handler::Handler;
    use crate::task::{Payload, TaskResult};
    use async_trait::async_trait;
    use libloading::Library;
    use std::sync::Arc;

    /// A handler that keeps its defining library mapped.
    ///
    /// Field order matters: the handler is dropped before the library.
    struct PluginHandler {
        handler: SharedHandler,
        _library: Arc<Library>,
    }

    #[async_trait]
    impl Handler for PluginHandler {
        async fn handle(&self, payload: Payload) -> TaskResult {
            self.handler.handle(payload).await
        }
    }

    #[cfg(unix)]
    fn check_directory(dir: &Path) -> Result<(), PluginError> {
        use std::os::unix::fs::PermissionsExt;
        let meta = std::fs::metadata(dir).map_err(|source| PluginError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        if meta.permissions().mode() & 0o002 != 0 {
            return Err(PluginError::InsecureDirectory {
                path: dir.to_path_buf(),
                reason: "directory is world-writable".into(),
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_directory(_dir: &Path) -> Result<(), PluginError> {
        Ok(())
    }

    pub(super) fn check_abi(path: &Path, found: u32) -> Result<(), PluginError> {
        if found == PLUGIN_ABI_VERSION {
            Ok(())
        } else {
            Err(PluginError::AbiMismatch {
                path: path.to_path_buf(),
                found,
                expected: PLUGIN_ABI_VERSION,
            })
        }
    }

    fn symbol_name(name: &str) -> Vec<u8> {
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        bytes
    }

    /// # Safety
    ///
    /// Runs the library's initialisers and its `NewHandler` factory.
    unsafe fn load_one(path: &Path) -> Result<SharedHandler, PluginError> {
        let library = Library::new(path).map_err(|e| PluginError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let missing = |symbol: &'static str| {
            move |e: libloading::Error| PluginError::MissingSymbol {
                path: path.to_path_buf(),
                symbol,
                reason: e.to_string(),
            }
        };

        let found: u32 = **library
            .get::<*const u32>(&symbol_name(ABI_VERSION_SYMBOL))
            .map_err(missing(ABI_VERSION_SYMBOL))?;
        check_abi(path, found)?;

        let factory: fn() -> SharedHandler = *library
            .get::<fn() -> SharedHandler>(&symbol_name(NEW_HANDLER_SYMBOL))
            .map_err(missing(NEW_HANDLER_SYMBOL))?;
        let handler = factory();
        Ok(Arc::new(PluginHandler {
            handler,
            _library: Arc::new(library),
        }))
    }

    /// Open every plugin in `dir` and return its handler keyed by file stem.
    ///
    /// Any failure aborts the whole load.
    pub fn load_plugins(dir: &Path) -> Result<Vec<(String, SharedHandler)>, PluginError> {
        check_directory(dir)?;
        let mut handlers = Vec::new();
        for path in discover_plugins(dir)? {
            let Some(key) = plugin_key(&path) else {
                continue;
            };
            // SAFETY: the directory is not world-writable and the ABI tag is
            // verified before the factory is called.
            let handler = unsafe { load_one(&path)? };
            debug!(key = %key, path = %path.display(), "loaded plugin");
            handlers.push((key, handler));
        }
        ensure_unique(&handlers)?;
        Ok(handlers)
    }

    /// Load every plugin in `dir` and register them, or register nothing on error.
    pub async fn load_plugins_into(
        dir: &Path,
        registry: &HandlerRegistry,
    ) -> Result<usize, PluginError> {
        let handlers = load_plugins(dir)?;
        let count = handlers.len();
        registry.extend(handlers).await;
        info!(dir = %dir.display(), count, "registered dynamic plugins");
        Ok(count)
    }
}

/// Export a handler from a plugin crate built as a `cdylib`.
///
/// Declares the ABI tag and a `NewHandler` factory evaluating `$handler` on
/// every call.
#[macro_export]
macro_rules! export_handler {
    ($handler:expr) => {
        #[no_mangle]
        pub static GOFLOW_PLUGIN_ABI_VERSION: u32 = $crate::plugin::PLUGIN_ABI_VERSION;

        #[no_mangle]
        #[allow(non_snake_case)]
        pub fn NewHandler() -> $crate::handler::SharedHandler {
            ::std::sync::Arc::new($handler)
        }
    };
}
