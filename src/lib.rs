//! This crate provides a signal resolution and correction server for federated access to
//! scientific experiment data.
//!
//! A client names the data it wants with a signal and a source address. The server parses the
//! address, fetches the data through a plugin, and applies the correction actions attached to the
//! signal's metadata: documentation, calibration, timing offsets and error models. Derived
//! (composite) signals are assembled recursively from the data, errors and dimensions of other
//! signals, and the result may be subset before it is returned.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON request and response data.
//! * [quick-xml](quick_xml) reads the correction action documents.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used for subsetting
//!   and reductions.

pub mod actions;
pub mod address;
pub mod app;
pub mod app_state;
pub mod array;
pub mod cli;
pub mod corrections;
pub mod error;
pub mod metrics;
pub mod models;
pub mod name_value;
pub mod operation;
pub mod operations;
pub mod plugin;
pub mod plugins;
pub mod resolver;
pub mod resource_manager;
pub mod server;
pub mod subset;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
pub mod validated_json;
pub mod xml;

pub use corrections::apply_actions;
pub use resolver::{Resolved, SignalResolver};
