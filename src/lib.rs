#![forbid(unsafe_code)]

//! `acp-link`: Agent Client Protocol runtime over stdio.
//!
//! [`acp`] is the protocol core (framing, codec, connection, session
//! updates, role adapters); [`bridge`] runs a shell-command agent on top
//! of it.

pub mod acp;
pub mod bridge;
pub mod config;
pub mod errors;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
