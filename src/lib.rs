// Core modules
pub mod advisory;
pub mod api;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod db;
pub mod engine;
pub mod indicators;
pub mod memory;
pub mod models;
pub mod notify;
pub mod signal;
pub mod tracker;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::SignalEngine;
pub use models::*;
