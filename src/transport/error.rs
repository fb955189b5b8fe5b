use std::io;

use bincode::error::{DecodeError, EncodeError};
use log::trace;
use thiserror::Error;

/// Failures reported by the transport. Every variant carries a stable
/// numeric code so it can travel inside a [`Fallible`](crate::Fallible)
/// without losing identity.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TransportError {
    #[error("Interrupted")]
    Interrupted = 1,
    #[error("Out of memory")]
    NoMemory = 2,
    #[error("Invalid argument")]
    InvalidArgument = 3,
    #[error("Resource busy")]
    Busy = 4,
    #[error("Timed out")]
    TimedOut = 5,
    #[error("Connection refused")]
    ConnectionRefused = 6,
    #[error("Object closed")]
    Closed = 7,
    #[error("Try again")]
    TryAgain = 8,
    #[error("Not supported")]
    NotSupported = 9,
    #[error("Address in use")]
    AddressInUse = 10,
    #[error("Incorrect state")]
    IncorrectState = 11,
    #[error("Entry not found")]
    NotFound = 12,
    #[error("Protocol error")]
    Protocol = 13,
    #[error("Destination unreachable")]
    Unreachable = 14,
    #[error("Address invalid")]
    AddressInvalid = 15,
    #[error("Permission denied")]
    PermissionDenied = 16,
    #[error("Message too large")]
    MessageTooLarge = 17,
    #[error("Connection aborted")]
    ConnectionAborted = 18,
    #[error("Connection reset")]
    ConnectionReset = 19,
    #[error("Connection shutdown")]
    ConnectionShutdown = 31,
    #[error("Internal error detected")]
    Internal = 1000,
}

const ALL: [TransportError; 21] = [
    TransportError::Interrupted,
    TransportError::NoMemory,
    TransportError::InvalidArgument,
    TransportError::Busy,
    TransportError::TimedOut,
    TransportError::ConnectionRefused,
    TransportError::Closed,
    TransportError::TryAgain,
    TransportError::NotSupported,
    TransportError::AddressInUse,
    TransportError::IncorrectState,
    TransportError::NotFound,
    TransportError::Protocol,
    TransportError::Unreachable,
    TransportError::AddressInvalid,
    TransportError::PermissionDenied,
    TransportError::MessageTooLarge,
    TransportError::ConnectionAborted,
    TransportError::ConnectionReset,
    TransportError::ConnectionShutdown,
    TransportError::Internal,
];

impl TransportError {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Looks a numeric code up in the transport's error table.
    pub fn from_code(code: i32) -> Option<Self> {
        ALL.iter().copied().find(|e| e.code() == code)
    }

    /// Maps a failure to bind a local address. A missing directory makes the
    /// address invalid; dialing the same path would be refused instead.
    pub(crate) fn from_bind(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::AddressInvalid,
            _ => error.into(),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        trace!("io error: {value:?}");
        match value.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => Self::ConnectionRefused,
            io::ErrorKind::ConnectionReset => Self::ConnectionReset,
            io::ErrorKind::ConnectionAborted => Self::ConnectionAborted,
            io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::ConnectionShutdown,
            io::ErrorKind::AddrInUse => Self::AddressInUse,
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => Self::AddressInvalid,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::TimedOut,
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::OutOfMemory => Self::NoMemory,
            io::ErrorKind::Unsupported => Self::NotSupported,
            _ => Self::Internal,
        }
    }
}

impl From<EncodeError> for TransportError {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::Io { inner, .. } => inner.into(),
            e => {
                trace!("encode error: {e:?}");
                Self::Internal
            }
        }
    }
}

impl From<DecodeError> for TransportError {
    fn from(value: DecodeError) -> Self {
        match value {
            DecodeError::LimitExceeded => Self::MessageTooLarge,
            DecodeError::UnexpectedEnd { .. } => Self::ConnectionShutdown,
            DecodeError::Io { inner, .. } => inner.into(),
            e => {
                trace!("decode error: {e:?}");
                Self::Protocol
            }
        }
    }
}
