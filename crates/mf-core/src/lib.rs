//! # mf-core
//!
//! Core types, tables, and error handling for marginal-force.
//!
//! This crate provides:
//! - Common error types
//! - The columnar [`Table`] passed between pipeline stages
//! - Shared record types ([`Role`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod table;
pub mod types;

pub use error::{Error, Result};
pub use table::{Column, Table};
pub use types::Role;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
