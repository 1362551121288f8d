pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod pipeline;
pub mod reconcile;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use config::Config;
pub use routes::{config as configure, AppState};
pub use security::ResponseHeaders;
