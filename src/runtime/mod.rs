//! The gRPC plugin boundary a host process uses to run an agent.
//!
//! A runtime binds a TCP port, announces it on stdout with a single
//! discovery line and serves `InvokeAgent` plus the standard health service
//! until it receives SIGINT or SIGTERM. Each invocation runs inside its own
//! span collection scope, so the spans it produced can be handed back to the
//! caller as a forest.

pub mod payload;
pub mod proto;
mod server;
mod service;
pub mod spans;

pub use server::{discovery_line, run_server, serve, serve_with_config, trace_propagating_endpoint};
pub use service::RuntimeService;
