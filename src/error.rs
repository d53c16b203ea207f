//! # Error Types
//!
//! Custom error types for the energy meter using `thiserror`.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the energy meter
#[derive(Debug, Error)]
pub enum MeterError {
    /// Invalid channel, converter or display configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed configuration file
    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The converter did not report a finished conversion in time
    #[error("Conversion on channel {channel} timed out after {waited:?}")]
    ConversionTimeout { channel: u8, waited: Duration },

    /// A reading or query referenced a channel the engine does not know
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Bus transport errors
    #[error("Bus error: {0}")]
    Bus(String),

    /// A publisher could not deliver a message
    #[error("Publish error: {0}")]
    Publish(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the energy meter
pub type Result<T> = std::result::Result<T, MeterError>;
