//! Errors surfaced by discovery and the connection lifecycle.
//!
//! None of these are fatal: the service turns each one into state events
//! for the observer.

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("no bonded device name starts with {prefix:?}")]
    DeviceNotFound { prefix: String },

    #[error("failed to open stream to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {timeout:?} opening stream to {address}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("device stream closed: {0}")]
    StreamClosed(#[source] io::Error),

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("unsupported device address {0:?}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
