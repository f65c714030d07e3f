//! warelay-common - Shared configuration and logging for the warelay services.
//!
//! This crate provides:
//! - Environment-driven configuration for the gateway
//! - Logging setup with library-noise suppression

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::Config;
pub use logging::init_logging;
