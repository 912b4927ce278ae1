pub mod auth;
pub mod chain_client;
pub mod config;
pub mod database;
pub mod downstream;
pub mod errors;
pub mod gateway;
pub mod handlers;

pub use config::Config;
pub use errors::{ProxyError, Result};
