//! editflow
//!
//! Turns natural-language change requests into applied, verified code edits.
//! A turn formats the repository context, asks a model for edits in one of
//! four formats, applies them atomically, runs the quality gates, and feeds
//! correctable failures back to the model.
//!
//! - `cli` - argument parsing and collaborator wiring for the binary
//! - `models` - edits, turns and configuration
//! - `services` - parsers, apply engine, context, gateway, coordinator
//! - `storage` - the JSON config file
//! - `utils` - error type and paths

pub mod cli;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::edit::{EditFormat, EditOperation, MalformedEdit};
pub use models::settings::AppConfig;
pub use models::turn::{TurnOutcome, TurnResult};
pub use services::reflection::{CoordinatorConfig, ReflectionCoordinator};
pub use storage::ConfigService;
pub use utils::error::{AppError, AppResult};
