use crate::cli::CommandLineArgs;
use crate::error::PluginError;
use crate::plugin::PluginRegistry;
use crate::plugins::{JsonFilePlugin, SignalStore};
use crate::resolver::SignalResolver;
use crate::resource_manager::ResourceManager;

use std::path::Path;
use std::sync::Arc;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resource manager.
    pub resource_manager: ResourceManager,

    /// Signal resolver.
    pub resolver: SignalResolver,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs, registry: PluginRegistry) -> Self {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let resource_manager = ResourceManager::new(task_limit);
        let resolver = SignalResolver::new(Arc::new(registry), args.environment());

        Self {
            args: args.clone(),
            resource_manager,
            resolver,
        }
    }
}

/// Returns the plugin registry configured by the arguments.
///
/// The signal store is the metadata catalogue and is loaded from `store_file` when given.
pub fn build_registry(args: &CommandLineArgs) -> Result<PluginRegistry, PluginError> {
    let store = match &args.store_file {
        Some(path) => SignalStore::from_file(Path::new(path))?,
        None => SignalStore::new(),
    };
    let store = Arc::new(store);
    let mut registry = PluginRegistry::new();
    registry.set_metadata(store.clone());
    registry.register(store);
    registry.register(Arc::new(JsonFilePlugin));
    Ok(registry)
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
