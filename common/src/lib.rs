//! Common types and constants for the execution services

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod constants;
pub mod types;

pub use types::*;
