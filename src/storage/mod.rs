//! Storage Layer
//!
//! JSON config persistence.

pub mod config;

pub use config::ConfigService;
