//! # Error Types Module
//!
//! Centralized error handling for ring-vitals.
//! Provides custom error types for each concern with proper context and error chaining.
//!
//! ## Error Types
//! - `DeviceError`: Commands sent to the wearable through the device port
//! - `StoreError`: Local time-series persistence
//! - `SyncError`: Uploads to and fetches from the remote backend
//! - `SessionError`: Measurement session lifecycle
//! - `ConfigError`: Configuration file I/O and parsing errors
//!
//! ## Usage Examples
//! ```rust,ignore
//! // Repositories use StoreError
//! pub async fn save_batch(&self, batch: Vec<R>) -> Result<usize, StoreError> { ... }
//!
//! // The controller surfaces device failures through SessionError
//! pub async fn start(&self) -> Result<(), SessionError> { ... }
//! ```

use std::fmt;

/// Errors reported by the device port
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The wearable is not connected
    NotConnected,
    /// The device rejected or failed a command
    CommandFailed { command: &'static str, reason: String },
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotConnected => {
                write!(f, "Ring is not connected")
            }
            DeviceError::CommandFailed { command, reason } => {
                write!(f, "Device command '{}' failed: {}", command, reason)
            }
        }
    }
}

impl std::error::Error for DeviceError {}

/// Errors that can occur in the local store
#[derive(Debug)]
pub enum StoreError {
    /// SQLite reported an error
    Database(rusqlite::Error),
    /// Failed to prepare the database location
    Io(std::io::Error),
    /// The writer thread has shut down
    Unavailable,
    /// ECG record carries a failed or out-of-range diagnosis and must not be stored
    InvalidMeasurement { timestamp: String, diagnose_type: u8 },
    /// Failed to encode or decode a JSON column
    Serialization(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => {
                write!(f, "Database error: {}", e)
            }
            StoreError::Io(e) => {
                write!(f, "Failed to prepare database location: {}", e)
            }
            StoreError::Unavailable => {
                write!(f, "Store writer is not running")
            }
            StoreError::InvalidMeasurement {
                timestamp,
                diagnose_type,
            } => {
                write!(
                    f,
                    "Invalid measurement {} (diagnose type {})",
                    timestamp, diagnose_type
                )
            }
            StoreError::Serialization(e) => {
                write!(f, "Failed to encode column: {}", e)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            StoreError::Io(e) => Some(e),
            StoreError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e)
    }
}

/// Errors that can occur while talking to the remote backend
#[derive(Debug)]
pub enum SyncError {
    /// Remote rejected or failed an upload
    Upload(String),
    /// Remote history could not be fetched
    Fetch(String),
    /// Local store failed while preparing or acknowledging an upload
    Store(StoreError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Upload(msg) => write!(f, "Upload failed: {}", msg),
            SyncError::Fetch(msg) => write!(f, "Fetch failed: {}", msg),
            SyncError::Store(e) => write!(f, "Local store error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

/// Errors that can occur while driving a measurement session
#[derive(Debug)]
pub enum SessionError {
    /// A session is already running
    AlreadyMeasuring,
    /// The device port failed a start or stop command
    Device(DeviceError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyMeasuring => write!(f, "A measurement is already running"),
            SessionError::Device(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Device(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for SessionError {
    fn from(e: DeviceError) -> Self {
        SessionError::Device(e)
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::CommandFailed {
            command: "start",
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("start"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_invalid_measurement_is_distinct() {
        let err = StoreError::InvalidMeasurement {
            timestamp: "2024-03-01 08:00:00".to_string(),
            diagnose_type: 0,
        };
        assert!(matches!(err, StoreError::InvalidMeasurement { .. }));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_sync_error_chain() {
        let err = SyncError::from(StoreError::Database(rusqlite::Error::QueryReturnedNoRows));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }
}
