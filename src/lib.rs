pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;

pub use config::Config;
pub use engine::AssignmentEngine;
pub use error::EngineError;
pub use store::ActivityStore;
