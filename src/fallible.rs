//! Explicit results for every fallible operation.
//!
//! [`Fallible`] is what the public API hands back instead of panicking or
//! returning garbage. Unlike [`Result`], it has two extra states: `Empty` for a
//! result that was never filled and `Consumed` for one whose payload has already
//! been moved out. Reading either of them is a usage bug, and it is reported as
//! a defined [`Error`] rather than undefined behaviour.
//!
//! # Example
//! ```rust
//! use tether::{Error, Fallible};
//!
//! let mut result = Fallible::success(42);
//! assert_eq!(result.take_value(), Ok(42));
//! assert!(result.is_consumed());
//! assert_eq!(result.take_value(), Err(Error::new(Error::CONSUMED)));
//! ```
//!
//! Rust moves are already checked at compile time. [`Fallible::take`] is the
//! runtime counterpart for results stored in places that cannot be moved out
//! of, such as struct fields or slots in a collection.
use std::mem;

use crate::error::Error;

#[must_use = "a Fallible may hold an error that should be inspected"]
#[derive(Debug, PartialEq, Eq)]
pub enum Fallible<T = ()> {
    Empty,
    Success(T),
    Error(Error),
    Consumed,
}

impl<T> Default for Fallible<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T> Fallible<T> {
    pub fn success(value: T) -> Self {
        Self::Success(value)
    }

    pub fn error(code: i32) -> Self {
        Self::Error(Error::new(code))
    }

    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self, Self::Consumed)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Why this instance does not hold a value.
    fn no_value(&self) -> Error {
        match self {
            Self::Error(e) => *e,
            Self::Empty => Error::new(Error::EMPTY),
            Self::Consumed | Self::Success(_) => Error::new(Error::CONSUMED),
        }
    }

    pub fn value_ref(&self) -> Result<&T, Error> {
        match self {
            Self::Success(value) => Ok(value),
            other => Err(other.no_value()),
        }
    }

    pub fn value_mut(&mut self) -> Result<&mut T, Error> {
        match self {
            Self::Success(value) => Ok(value),
            other => Err(other.no_value()),
        }
    }

    /// Moves the value out and leaves this instance `Consumed`. Any other
    /// state is left untouched.
    pub fn take_value(&mut self) -> Result<T, Error> {
        if !self.is_success() {
            return Err(self.no_value());
        }
        match mem::replace(self, Self::Consumed) {
            Self::Success(value) => Ok(value),
            _ => unreachable!("state checked above"),
        }
    }

    /// Moves the whole state out, leaving `Consumed` behind whatever the
    /// state was.
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::Consumed)
    }

    pub fn error_code(&self) -> Result<i32, Error> {
        match self {
            Self::Error(e) => Ok(e.code()),
            _ => Err(Error::new(Error::NOT_AN_ERROR)),
        }
    }

    pub fn error_description(&self) -> Result<String, Error> {
        match self {
            Self::Error(e) => Ok(e.description()),
            _ => Err(Error::new(Error::NOT_AN_ERROR)),
        }
    }

    /// Forwards an error to a result of another value type, keeping its code.
    /// Any non-error state yields [`Error::NOT_AN_ERROR`].
    pub fn reinterpret_error_as<U>(&self) -> Fallible<U> {
        match self {
            Self::Error(e) => Fallible::Error(*e),
            _ => Fallible::error(Error::NOT_AN_ERROR),
        }
    }

    pub fn map<U, F>(self, f: F) -> Fallible<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Success(value) => Fallible::Success(f(value)),
            Self::Error(e) => Fallible::Error(e),
            Self::Empty => Fallible::Empty,
            Self::Consumed => Fallible::Consumed,
        }
    }

    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Success(value) => Ok(value),
            other => Err(other.no_value()),
        }
    }
}

impl Fallible<()> {
    /// Success for operations without a value.
    pub fn success_void() -> Self {
        Self::Success(())
    }
}

impl<T> From<Result<T, Error>> for Fallible<T> {
    fn from(value: Result<T, Error>) -> Self {
        match value {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Error(e),
        }
    }
}

impl<T> From<Error> for Fallible<T> {
    fn from(value: Error) -> Self {
        Self::Error(value)
    }
}
