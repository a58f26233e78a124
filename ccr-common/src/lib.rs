//! # CCR Common Library
//!
//! Shared code for the code-compliance reviewer: error types, bootstrap
//! configuration, logging setup, the event bus and the SQLite schema.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
