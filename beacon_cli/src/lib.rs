pub mod config;
pub mod error;
pub mod formatting;
pub mod settings;
