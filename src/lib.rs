pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod integrations;
pub mod models;
pub mod observability;
pub mod state;

#[cfg(test)]
mod testing;
