use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a sensor collaborator. Never fatal: the control loop
/// substitutes NaN for the affected value and keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response length: {0} bytes")]
    BadLength(usize),

    #[error("CRC mismatch (expected {expected:#04x}, got {actual:#04x})")]
    CrcMismatch { expected: u8, actual: u8 },

    #[error("sensor not fitted")]
    Absent,
}

/// Controller error types
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to create session file {path}: {source}")]
    SessionCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("all session file numbers 0..={max} are in use")]
    FileNumbersExhausted { max: u16 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("display error: {0}")]
    Display(String),

    #[error("shutdown handoff failed: {0}")]
    Shutdown(String),
}

/// Result type for controller operations
pub type DaqResult<T> = Result<T, DaqError>;
