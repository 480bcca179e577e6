//! Library entrypoint: re‑export modules

pub mod config;
pub mod constants;
pub mod db_utils;
pub mod errors;
pub mod filter;
pub mod ingestor;
pub mod lookup;
pub mod metrics;
pub mod models;
pub mod query;
pub mod server;
