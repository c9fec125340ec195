pub mod config;
pub mod types;

// Re-export the data model for easy access
pub use types::*;
