#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Inner AI Shared Types and Utilities
//!
//! Domain types and database helpers shared by the billing, API and
//! worker crates.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
