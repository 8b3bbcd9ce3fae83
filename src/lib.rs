//! Matchmaker: hands idle render nodes to streaming clients.
//!
//! Render nodes hold a TCP control connection to the matchmaker and report
//! readiness and client counts over it ([`protocol`]). The [`registry`]
//! tracks one entry per connection, and the HTTP side ([`server`]) picks a
//! free node for each client that asks.

pub mod cli;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
