//! Common utilities and types shared across the VRRP manager crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
