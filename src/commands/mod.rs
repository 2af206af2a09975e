//! Command handlers for the CLI
//!
//! - `mcp`: server status, tool listing, tool calls and schema inspection

pub mod mcp;
