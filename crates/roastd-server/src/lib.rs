//! `roastd` control-plane server library.
//!
//! The binary in `main.rs` wires configuration, stores, the fabric
//! services, background loops, and the HTTP surfaces defined here.

pub mod agent;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;
