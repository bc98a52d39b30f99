//! Extension traits for moving foreign errors into the taxonomy.
//!
//! Provides combinators so call sites can stay on the `?` railway without
//! hand-writing `map_err` closures for every serde or I/O failure.

use std::fmt::Display;

use crate::error::{Error, Result};

/// Conversions from any displayable error into an Entropy [`Error`].
pub trait ErrorContext<T> {
    /// Map the error into an `Internal` error with the given message.
    fn internal(self, message: impl Into<String>) -> Result<T>;

    /// Map the error into an `Invalid` error with the given message.
    fn invalid(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: Display> ErrorContext<T> for std::result::Result<T, E> {
    fn internal(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::internal(message).with_cause(e))
    }

    fn invalid(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::invalid(message).with_cause(e))
    }
}

/// Extension trait for Option types.
pub trait OptionExt<T> {
    /// Convert `None` into a `NotFound` error with the given message.
    fn or_not_found(self, message: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| Error::not_found(message))
    }
}
