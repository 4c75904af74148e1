//! Data Models
//!
//! Configuration, edit and turn representations shared across services.

pub mod edit;
pub mod settings;
pub mod turn;

pub use edit::*;
pub use settings::*;
pub use turn::*;
