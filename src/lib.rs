pub mod adapter;
pub mod auth;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod resource;
pub mod tasks;
pub mod todo;
pub mod types;

pub mod testing;
