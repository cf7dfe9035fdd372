//! Built-in data plugins.
//!
//! * [SignalStore] is a signal catalogue with in-memory data, loaded from JSON.
//! * [JsonFilePlugin] reads data blocks from JSON files.

use crate::error::PluginError;
use crate::models::{ClientBlock, DataSource, Environment, Metadata, RequestData, SignalDesc};
use crate::plugin::{DataPlugin, Fetched, MetadataPlugin};
use crate::types::DataBlock;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{event, Level};

/// Format name of the signal store plugin.
pub const STORE_FORMAT: &str = "STORE";

/// Format name of the JSON file plugin.
pub const JSON_FORMAT: &str = "JSON";

/// A catalogue record of the signal store, with optional data.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StoreEntry {
    #[serde(flatten)]
    pub metadata: Metadata,
    /// Data block. Signals without data are derived from their correction metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<serde_json::Value>,
}

impl StoreEntry {
    fn matches(&self, name: &str, request: &RequestData) -> bool {
        let signal = &self.metadata.signal;
        let archive = &self.metadata.data_source.archive;
        self.metadata.signal_desc.signal_name.eq_ignore_ascii_case(name)
            && (request.archive.is_empty()
                || archive.is_empty()
                || archive.eq_ignore_ascii_case(&request.archive))
            && (signal.exp_number == 0 || signal.exp_number == request.exp_number)
            && (request.pass < 0 || signal.pass < 0 || signal.pass == request.pass)
    }
}

/// Signal store file contents.
#[derive(Debug, Default, Deserialize, Serialize)]
struct StoreFile {
    #[serde(default)]
    signals: Vec<StoreEntry>,
}

/// Signal catalogue with in-memory data.
///
/// Entries for experiment 0 match any experiment. When several entries match, the one with the
/// highest pass is used.
#[derive(Debug, Default)]
pub struct SignalStore {
    entries: RwLock<HashMap<String, Vec<StoreEntry>>>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON document of the form `{"signals": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        let file: StoreFile = serde_json::from_str(json).map_err(|error| PluginError::Json {
            path: "<inline>".to_string(),
            error,
        })?;
        let store = Self::new();
        for entry in file.signals {
            store.register(entry)?;
        }
        Ok(store)
    }

    /// Build a store from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, PluginError> {
        let json = std::fs::read_to_string(path).map_err(|error| PluginError::Io {
            path: path.display().to_string(),
            error,
        })?;
        let store = Self::from_json(&json).map_err(|error| match error {
            PluginError::Json { error, .. } => PluginError::Json {
                path: path.display().to_string(),
                error,
            },
            error => error,
        })?;
        event!(
            Level::INFO,
            path = %path.display(),
            signals = store.len(),
            "loaded signal store"
        );
        Ok(store)
    }

    /// Add an entry to the store.
    pub fn register(&self, entry: StoreEntry) -> Result<(), PluginError> {
        let key = entry.metadata.signal_desc.signal_name.to_ascii_lowercase();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PluginError::Backend("signal store lock poisoned".to_string()))?;
        entries.entry(key).or_default().push(entry);
        Ok(())
    }

    /// Number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.values().map(Vec::len).sum())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the best entry matching `name` for `request`.
    fn find(&self, name: &str, request: &RequestData) -> Result<StoreEntry, PluginError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| PluginError::Backend("signal store lock poisoned".to_string()))?;
        entries
            .get(&name.to_ascii_lowercase())
            .and_then(|candidates| {
                candidates
                    .iter()
                    .filter(|entry| entry.matches(name, request))
                    .max_by_key(|entry| entry.metadata.signal.pass)
            })
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                signal: name.to_string(),
                location: format!("experiment {}", request.exp_number),
            })
    }
}

impl MetadataPlugin for SignalStore {
    fn lookup(&self, request: &RequestData) -> Result<Metadata, PluginError> {
        let mut metadata = self.find(&request.signal, request)?.metadata;
        if metadata.signal.exp_number == 0 {
            metadata.signal.exp_number = request.exp_number;
        }
        Ok(metadata)
    }
}

impl DataPlugin for SignalStore {
    fn format(&self) -> &str {
        STORE_FORMAT
    }

    fn fetch(
        &self,
        request: &RequestData,
        _client: &ClientBlock,
        _environment: &Environment,
    ) -> Result<Fetched, PluginError> {
        let name = request.name_value("signal").unwrap_or(&request.signal);
        let entry = self.find(name, request)?;
        match entry.block {
            Some(block) => {
                let block: DataBlock =
                    serde_json::from_value(block).map_err(|error| PluginError::Json {
                        path: name.to_string(),
                        error,
                    })?;
                Ok(Fetched::Data {
                    block,
                    metadata: entry.metadata,
                })
            }
            None => Ok(Fetched::Derived {
                metadata: entry.metadata,
            }),
        }
    }
}

/// Reads data blocks from JSON files.
///
/// A file is an object mapping signal names to data blocks. The file is taken from the request
/// path, or the `file` argument of a function call.
#[derive(Debug, Default)]
pub struct JsonFilePlugin;

impl DataPlugin for JsonFilePlugin {
    fn format(&self) -> &str {
        JSON_FORMAT
    }

    fn extensions(&self) -> &[&str] {
        &["json"]
    }

    fn fetch(
        &self,
        request: &RequestData,
        _client: &ClientBlock,
        _environment: &Environment,
    ) -> Result<Fetched, PluginError> {
        let path = if request.path.is_empty() {
            request.name_value("file").unwrap_or_default()
        } else {
            request.path.as_str()
        };
        let signal = request.name_value("signal").unwrap_or(&request.signal);
        let json = std::fs::read_to_string(path).map_err(|error| PluginError::Io {
            path: path.to_string(),
            error,
        })?;
        let mut signals: HashMap<String, serde_json::Value> = serde_json::from_str(&json)
            .map_err(|error| PluginError::Json {
                path: path.to_string(),
                error,
            })?;
        let key = signals
            .keys()
            .find(|key| key.eq_ignore_ascii_case(signal))
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                signal: signal.to_string(),
                location: path.to_string(),
            })?;
        let value = signals.remove(&key).unwrap_or_default();
        let block: DataBlock =
            serde_json::from_value(value).map_err(|error| PluginError::Json {
                path: path.to_string(),
                error,
            })?;
        let filename = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = Metadata {
            signal_desc: SignalDesc {
                signal_name: key,
                ..Default::default()
            },
            data_source: DataSource {
                exp_number: request.exp_number,
                pass: request.pass,
                path: path.to_string(),
                filename,
                format: JSON_FORMAT.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(Fetched::Data { block, metadata })
    }
}
