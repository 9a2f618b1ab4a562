//! Common utilities for motor-odm
//!
//! This crate provides the error type shared by the ODM core and its storage backends.

pub mod error;

pub use error::{OdmError, Result, DUPLICATE_KEY_CODE};
