//! mcphub - MCP client connection manager library
//!
//! This library connects to a set of MCP (Model Context Protocol) tool
//! servers, supervises their connections with retry and transport
//! fallback, aggregates their tools into a catalog and routes tool calls.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: Transports, registry, supervisor, catalog, schema translation,
//!   invocation gateway and the `McpManager` facade
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: CLI command handlers
//!
//! # Example
//!
//! ```no_run
//! use mcphub::{Config, McpManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let manager = McpManager::new(&config.mcp)?;
//!     manager.initialize().await;
//!     println!("{} tools available", manager.list_all_tools().await.len());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{McpHubError, Result};
pub use mcp::gateway::{ToolCallOutcome, ToolCallResponse};
pub use mcp::manager::McpManager;
