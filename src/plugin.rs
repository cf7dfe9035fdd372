//! Data access plugin interface and registry.

use crate::error::PluginError;
use crate::models::{ClientBlock, Environment, Metadata, RequestData};
use crate::types::DataBlock;

use std::sync::Arc;

/// Result of a plugin fetch
#[derive(Debug)]
pub enum Fetched {
    /// Data read from the backend
    Data { block: DataBlock, metadata: Metadata },
    /// The signal has no stored data and is derived from its correction metadata
    Derived { metadata: Metadata },
}

/// Trait for data backends.
///
/// Plugins are shared between concurrent resolutions.
pub trait DataPlugin: Send + Sync {
    /// Format name used to select the plugin, e.g. `JSON`
    fn format(&self) -> &str;

    /// File extensions handled by the plugin, without the leading dot.
    fn extensions(&self) -> &[&str] {
        &[]
    }

    /// Read the data addressed by `request`.
    fn fetch(
        &self,
        request: &RequestData,
        client: &ClientBlock,
        environment: &Environment,
    ) -> Result<Fetched, PluginError>;
}

/// Trait for signal metadata catalogues used by generic requests.
pub trait MetadataPlugin: Send + Sync {
    /// Look up the catalogue records of the signal addressed by `request`.
    fn lookup(&self, request: &RequestData) -> Result<Metadata, PluginError>;
}

/// Registry of data plugins, indexed by id.
///
/// The registry is built at start-up and shared immutably afterwards.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn DataPlugin>>,
    metadata: Option<Arc<dyn MetadataPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data plugin, returning its id.
    pub fn register(&mut self, plugin: Arc<dyn DataPlugin>) -> usize {
        self.plugins.push(plugin);
        self.plugins.len() - 1
    }

    /// Set the metadata catalogue used by generic requests.
    pub fn set_metadata(&mut self, metadata: Arc<dyn MetadataPlugin>) {
        self.metadata = Some(metadata);
    }

    /// Returns the id of the plugin for `format`, ignoring case.
    pub fn find_by_format(&self, format: &str) -> Option<usize> {
        let format = format.trim();
        if format.is_empty() {
            return None;
        }
        self.plugins
            .iter()
            .position(|plugin| plugin.format().eq_ignore_ascii_case(format))
    }

    /// Returns the id of the plugin handling files with extension `extension`, ignoring case.
    pub fn find_by_extension(&self, extension: &str) -> Option<usize> {
        let extension = extension.trim_start_matches('.');
        self.plugins.iter().position(|plugin| {
            plugin
                .extensions()
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(extension))
        })
    }

    pub fn get(&self, id: usize) -> Option<&Arc<dyn DataPlugin>> {
        self.plugins.get(id)
    }

    pub fn metadata(&self) -> Option<&Arc<dyn MetadataPlugin>> {
        self.metadata.as_ref()
    }

    /// Number of registered data plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formats: Vec<&str> = self.plugins.iter().map(|plugin| plugin.format()).collect();
        f.debug_struct("PluginRegistry")
            .field("formats", &formats)
            .field("metadata", &self.metadata.is_some())
            .finish()
    }
}
