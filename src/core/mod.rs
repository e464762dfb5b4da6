//! Core translation engine module

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod errors;
pub mod lookup;
pub mod mock;
pub mod models;
pub mod parser;
pub mod pool;
pub mod prompt;
pub mod retry;
pub mod store;
