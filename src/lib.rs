pub mod collector_config;
pub mod config;
pub mod errors;
pub mod host;
pub mod inputs;
pub mod orchestrator;
pub mod pipeline;
pub mod query;
pub mod resolver;
pub mod sql;
pub mod state;
pub mod step;
pub mod steps;
pub mod ui;

#[cfg(test)]
mod testing;
