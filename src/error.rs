use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Why a notification could not be turned into a measurement.
///
/// None of these are fatal: the session drops the packet and reports a
/// debug-level status line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid packet length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid date in packet: {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")]
    InvalidDate {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    },

    #[error("packet date {0} is outside the plausible window")]
    DateOutOfRange(chrono::NaiveDateTime),
}

/// Failures reported by a [`crate::transport::Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth permission denied")]
    PermissionDenied,

    #[error("bluetooth adapter is disabled")]
    AdapterDisabled,

    #[error("no bluetooth adapter found")]
    AdapterNotFound,

    #[error("device not found")]
    DeviceNotFound,

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("{0}")]
    Other(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => TransportError::PermissionDenied,
            btleplug::Error::DeviceNotFound => TransportError::DeviceNotFound,
            btleplug::Error::NotConnected => {
                TransportError::ConnectFailed("device not connected".into())
            }
            btleplug::Error::TimedOut(d) => TransportError::Timeout(d),
            other => TransportError::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::InvalidLength {
            expected: 13,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "invalid packet length: expected 13 bytes, got 4"
        );

        let err = DecodeError::InvalidDate {
            year: 2024,
            month: 13,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(
            err.to_string(),
            "invalid date in packet: 2024-13-01 00:00:00"
        );
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(10)).to_string(),
            "operation timed out after 10s"
        );
        assert_eq!(
            TransportError::from(btleplug::Error::PermissionDenied),
            TransportError::PermissionDenied
        );
    }
}
