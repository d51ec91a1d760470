pub mod config;
pub mod context;
pub mod dedup;
pub mod errors;
pub mod migrate;
pub mod orchestrator;
pub mod resolver;
pub mod source;
pub mod store;
pub mod validate;
