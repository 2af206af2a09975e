//! MCP (Model Context Protocol) connection manager
//!
//! Connects to a set of remote tool servers, keeps their tool lists in a
//! shared catalog and routes tool calls to them. Servers without an
//! endpoint can run on placeholder tools.
//!
//! The client speaks protocol revision **2025-11-25** and accepts
//! **2025-03-26** and **2024-11-05** servers.
//!
//! # Module Layout
//!
//! - `types`      -- MCP protocol types and JSON-RPC primitives
//! - `client`     -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`   -- Typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `transport`  -- `Transport` trait, Streamable HTTP and legacy SSE
//! - `connection` -- Connected sessions and the `Connector` seam
//! - `offline`    -- Placeholder tools for endpoint-less servers
//! - `registry`   -- Server descriptors and live connection state
//! - `catalog`    -- Aggregated tool catalog
//! - `schema`     -- Cached input-schema translation
//! - `supervisor` -- Connection lifecycle, backoff and fallback
//! - `gateway`    -- Tool invocation with structured outcomes
//! - `events`     -- State-change notifications
//! - `config`     -- Manager configuration
//! - `manager`    -- Facade wiring all of the above

pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod events;
pub mod gateway;
pub mod manager;
pub mod offline;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use manager::McpManager;
