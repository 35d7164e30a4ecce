//! Adapters - concrete implementations of ports

pub mod dbt;
pub mod duckdb;
pub mod gemini;
pub mod local_store;
pub mod statement;
