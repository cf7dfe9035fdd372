use crate::models::*;
use crate::plugin::PluginRegistry;
use crate::plugins::{JsonFilePlugin, SignalStore};

use std::sync::Arc;

/// Signal catalogue used by tests.
///
/// * `ipla` plasma current in A, archive `efm`
/// * `ipla_err` its error
/// * `ip_ka` plasma current, calibrated to kA for experiments 10000 to 20000
/// * `ip_composite` composite of `ipla` and `ipla_err`
/// * `undefined_composite` composite without a definition
/// * `loop` composite of itself
pub(crate) const TEST_STORE: &str = r#"{
    "signals": [
        {
            "signal_desc": {"signal_name": "ipla"},
            "signal": {"exp_number": 0, "pass": 0},
            "data_source": {"archive": "efm", "format": "STORE"},
            "block": {"data": {"dtype": "float32", "values": [0.0, 150000.0, 300000.0, 450000.0]}}
        },
        {
            "signal_desc": {"signal_name": "ipla_err"},
            "signal": {"exp_number": 0, "pass": 0},
            "data_source": {"format": "STORE"},
            "block": {"data": {"dtype": "float32", "values": [10.0, 10.0, 10.0, 10.0]}}
        },
        {
            "signal_desc": {
                "signal_name": "ip_ka",
                "xml": "<action><signal><documentation exp_number_start=\"10000\" exp_number_end=\"20000\"><label>Plasma Current</label></documentation><calibration exp_number_start=\"10000\" exp_number_end=\"20000\" target=\"data\"><factor>0.001</factor><units>kA</units></calibration></signal></action>"
            },
            "signal": {"exp_number": 0, "pass": 0},
            "data_source": {"archive": "efm", "format": "STORE"},
            "block": {"data": {"dtype": "float32", "values": [0.0, 150000.0, 300000.0, 450000.0]}}
        },
        {
            "signal_desc": {
                "signal_name": "ip_composite",
                "type": "composite",
                "xml": "<action><signal><composite data=\"ipla\" error=\"ipla_err\" order=\"0\"/><documentation><label>Composite Current</label></documentation></signal></action>"
            },
            "signal": {"exp_number": 0, "pass": 0}
        },
        {
            "signal_desc": {
                "signal_name": "undefined_composite",
                "type": "composite",
                "xml": "<action><signal><documentation><label>Nothing</label></documentation></signal></action>"
            },
            "signal": {"exp_number": 0, "pass": 0}
        },
        {
            "signal_desc": {
                "signal_name": "loop",
                "type": "composite",
                "xml": "<action><signal><composite data=\"loop\"/></signal></action>"
            },
            "signal": {"exp_number": 0, "pass": 0}
        }
    ]
}"#;

/// Create a registry with the signal store as catalogue and data plugin, and the JSON file
/// plugin.
pub(crate) fn get_test_registry() -> PluginRegistry {
    let store = Arc::new(SignalStore::from_json(TEST_STORE).unwrap());
    let mut registry = PluginRegistry::new();
    registry.set_metadata(store.clone());
    registry.register(store);
    registry.register(Arc::new(JsonFilePlugin));
    registry
}

/// Create a ResolveRequest object with only required fields set.
pub(crate) fn get_test_resolve_request() -> ResolveRequest {
    ResolveRequest {
        signal: "efm::ipla".to_string(),
        source: "12345".to_string(),
        client: ClientBlock::default(),
    }
}
