//! Command Line Interface (CLI) arguments.

use crate::models::{Environment, DEFAULT_DELIMITER, DEFAULT_MAX_DEPTH};

use clap::Parser;

/// Signal resolver command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "SIGNAL_RESOLVER_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "SIGNAL_RESOLVER_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "SIGNAL_RESOLVER_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/signal-resolver/certs/cert.pem",
        env = "SIGNAL_RESOLVER_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/signal-resolver/certs/key.pem",
        env = "SIGNAL_RESOLVER_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for operations to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "SIGNAL_RESOLVER_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "SIGNAL_RESOLVER_USE_RAYON")]
    pub use_rayon: bool,
    /// Maximum number of concurrent resolution tasks. Defaults to one less than the number of
    /// CPUs.
    #[arg(long, env = "SIGNAL_RESOLVER_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Archive of signals without an archive prefix
    #[arg(long, default_value = "", env = "SIGNAL_RESOLVER_DEFAULT_ARCHIVE")]
    pub default_archive: String,
    /// Device name stripped from the start of sources
    #[arg(long, default_value = "", env = "SIGNAL_RESOLVER_DEFAULT_DEVICE")]
    pub default_device: String,
    /// Delimiter between address prefix tokens
    #[arg(long, default_value = DEFAULT_DELIMITER, env = "SIGNAL_RESOLVER_DELIMITER")]
    pub delimiter: String,
    /// Whether generic requests are forwarded to the device's server
    #[arg(long, default_value_t = false, env = "SIGNAL_RESOLVER_PROXY")]
    pub proxy: bool,
    /// Maximum recursion depth when resolving derived signals
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH, env = "SIGNAL_RESOLVER_MAX_DEPTH")]
    pub max_depth: usize,
    /// Whether correction actions that cannot be applied fail the request
    #[arg(long, default_value_t = false, env = "SIGNAL_RESOLVER_STRICT_CORRECTIONS")]
    pub strict_corrections: bool,
    /// Path to a JSON signal store loaded at startup
    #[arg(long, env = "SIGNAL_RESOLVER_STORE_FILE")]
    pub store_file: Option<String>,
}

impl CommandLineArgs {
    /// Returns the resolution environment configured by the arguments.
    pub fn environment(&self) -> Environment {
        Environment {
            default_archive: self.default_archive.clone(),
            default_device: self.default_device.clone(),
            delimiter: self.delimiter.clone(),
            proxy: self.proxy,
            max_depth: self.max_depth,
            strict_corrections: self.strict_corrections,
        }
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
