//! Error codes shared by every fallible operation.
//!
//! An [`Error`] is a bare numeric code. Codes below `0x3000_0000` come from the
//! transport's table ([`TransportError`]); the crate reserves a handful of codes
//! of its own for usage errors that the transport knows nothing about.
use thiserror::Error;

use crate::transport::TransportError;

/// An error code with a description resolved on demand.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[error("{}", describe_code(.code))]
pub struct Error {
    code: i32,
}

impl Error {
    /// A value was read after it had already been moved out.
    pub const CONSUMED: i32 = 0x3000_0001;
    /// A socket was opened a second time.
    pub const ALREADY_OPEN: i32 = 0x3000_0002;
    /// A pending request was replied to a second time.
    pub const ALREADY_REPLIED: i32 = 0x3000_0003;
    /// An error was requested from a result that does not hold one.
    pub const NOT_AN_ERROR: i32 = 0x3000_0004;
    /// A value was read from a result that was never filled.
    pub const EMPTY: i32 = 0x7FFF_FFFF;

    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn description(&self) -> String {
        describe(self.code)
    }

    /// The transport error behind this code, if it is a transport code.
    pub fn transport(&self) -> Option<TransportError> {
        TransportError::from_code(self.code)
    }

    pub fn is_timeout(&self) -> bool {
        self.transport() == Some(TransportError::TimedOut)
    }

    pub fn is_closed(&self) -> bool {
        self.transport() == Some(TransportError::Closed)
    }
}

impl From<TransportError> for Error {
    fn from(value: TransportError) -> Self {
        Self::new(value.code())
    }
}

/// Resolves a code to text, consulting the reserved codes first and the
/// transport's table second.
pub fn describe(code: i32) -> String {
    match code {
        Error::CONSUMED => "result object moved; this instance is no longer valid".to_string(),
        Error::ALREADY_OPEN => "socket is already opened".to_string(),
        Error::ALREADY_REPLIED => "request has already been replied to".to_string(),
        Error::NOT_AN_ERROR => "result does not hold an error".to_string(),
        Error::EMPTY => "result is empty".to_string(),
        code => match TransportError::from_code(code) {
            Some(e) => e.to_string(),
            None => format!("Unknown error #{code}"),
        },
    }
}

fn describe_code(code: &i32) -> String {
    describe(*code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_codes_have_their_own_text() {
        assert_eq!(
            Error::new(Error::CONSUMED).to_string(),
            "result object moved; this instance is no longer valid"
        );
        assert_eq!(
            Error::new(Error::ALREADY_OPEN).description(),
            "socket is already opened"
        );
        assert_eq!(describe(Error::EMPTY), "result is empty");
    }

    #[test]
    fn transport_codes_use_the_transport_table() {
        let err: Error = TransportError::ConnectionRefused.into();

        assert_eq!(err.code(), 6);
        assert_eq!(err.to_string(), "Connection refused");
        assert_eq!(err.transport(), Some(TransportError::ConnectionRefused));
        assert!(Error::from(TransportError::TimedOut).is_timeout());
    }

    #[test]
    fn unknown_codes_are_still_described() {
        assert_eq!(describe(4242), "Unknown error #4242");
        assert_eq!(Error::new(Error::ALREADY_REPLIED).transport(), None);
    }
}
