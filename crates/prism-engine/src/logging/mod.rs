//! Logger initialisation.
//!
//! The engine only emits through the `log` facade; hosts call
//! [`init_logging`] once to install `env_logger` as the sink.

mod init;

pub use init::{DEFAULT_FILTER, LoggingConfig, init_logging};
