//! `chime-core`: configuration, shared error type and minute-clock helpers
//! used by every chime crate.

pub mod clock;
pub mod config;
pub mod error;

pub use config::ChimeConfig;
pub use error::{ChimeError, Result};
