use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum MonitorError {
    #[error("Storage directory unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Unexpected partition header: {0}")]
    UnexpectedHeader(String),

    #[error("Invalid export name: {0}")]
    InvalidExportName(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Faults raised by a sensor bridge while talking to the tag reader.
///
/// "No tag in range" is not an error; bridges report it as `Ok(None)`.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge is not connected")]
    NotConnected,

    #[error("Link timed out after {0} ms")]
    Timeout(u64),

    #[error("Malformed health payload: {0}")]
    MalformedPayload(String),

    #[error("Link driver fault: {0}")]
    Driver(String),

    #[error("Link lost: {0}")]
    LinkLost(String),
}

impl BridgeError {
    /// Whether the failure means the link is gone and the session must reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeError::NotConnected | BridgeError::LinkLost(_))
    }
}
