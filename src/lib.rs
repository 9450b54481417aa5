pub mod auth;
pub mod board;
pub mod config;
pub mod error;
pub mod gate;
pub mod mentions;
pub mod metrics;
pub mod models;
pub mod openapi;
pub mod password;
pub mod rate_limit; // per-session anti-spam throttle
pub mod repo;
pub mod routes;
pub mod session;
pub mod settings;
pub mod storage;
pub mod word_filter;

// Re-export commonly used items for tests / external users
pub use board::{Board, Moderator, Submission};
pub use config::BoardConfig;
pub use routes::{config as configure, AppState};
