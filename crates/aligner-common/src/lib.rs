//! Aligner Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the aligner activity workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`AlignerError`] and the crate-wide [`Result`] alias
//! - **Logging**: [`logging::init_logging`] and its [`logging::LogConfig`]
//! - **Types**: the closed set of child entity kinds an activity payload can describe
//!
//! # Example
//!
//! ```no_run
//! use aligner_common::logging::{init_logging, LogConfig};
//! use aligner_common::types::EntityKind;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let kind = EntityKind::from_object_name("AFSetup");
//!     tracing::info!(table = ?kind.map(|k| k.table_name()), "resolved payload table");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{AlignerError, Result};
pub use types::EntityKind;
