//! Orchestration layer: the dedup broadcaster, the request lifecycle /
//! failover engine, the token counter, and the HTTP surface that wires them
//! to axum. Everything below the Pool/Router/AuthResolver/Converter that
//! `llmproxy-provider-core` and `llmproxy-transform` already provide.

pub mod bootstrap;
pub mod broadcaster;
pub mod http;
pub mod lifecycle;
pub mod state;
pub mod token_counter;
pub mod upstream_client;

pub use bootstrap::{bootstrap, bootstrap_from_env, Bootstrap, CliArgs};
pub use state::AppState;
