//! Client-side correlation engine for the jobwire protocol.
//!
//! Provides the WebSocket connection manager, the registry of in-flight
//! invocations, and [`InvocationClient`], the entry point that turns
//! `invoke(job, params)` into exactly one result per call.

pub mod config;
pub mod connection;
pub mod error;
pub mod invoker;
pub mod registry;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState, Endpoint};
pub use error::InvokeError;
pub use invoker::InvocationClient;
pub use registry::InvocationRegistry;
