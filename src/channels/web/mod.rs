//! Web gateway: the HTTP API the dashboard talks to.

pub mod auth;
pub mod server;
pub mod types;

pub use server::{GatewayState, start_server};
