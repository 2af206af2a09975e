//! Command-line interface definition for mcphub
//!
//! This module defines the CLI structure using clap's derive API. Every
//! command loads the configuration, initializes the connection manager and
//! reports on it.

use clap::{Parser, Subcommand};

/// mcphub - MCP connection manager
///
/// Connect to configured MCP tool servers, inspect their tools and call
/// them from the command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcphub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the number of connection retries
    #[arg(long, global = true)]
    pub retry_attempts: Option<u32>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcphub
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show every configured server and its connection status
    Servers {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List tools advertised by connected servers
    Tools {
        /// Only list tools of this server
        #[arg(short, long)]
        server: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Call a tool and print the response
    Call {
        /// Server id
        server: String,

        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Print the translated parameter schema of a tool
    Schema {
        /// Server id
        server: String,

        /// Tool name
        tool: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            retry_attempts: None,
            command: Commands::Servers { json: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Servers { json: false }));
    }

    #[test]
    fn test_cli_parse_servers_json() {
        let cli = Cli::try_parse_from(["mcphub", "servers", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Servers { json: true }));
    }

    #[test]
    fn test_cli_parse_tools_with_server() {
        let cli = Cli::try_parse_from(["mcphub", "tools", "--server", "demo"]).unwrap();
        if let Commands::Tools { server, json } = cli.command {
            assert_eq!(server, Some("demo".to_string()));
            assert!(!json);
        } else {
            panic!("Expected Tools command");
        }
    }

    #[test]
    fn test_cli_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "mcphub",
            "call",
            "demo",
            "echo",
            "--args",
            r#"{"message":"hi"}"#,
        ])
        .unwrap();
        if let Commands::Call { server, tool, args } = cli.command {
            assert_eq!(server, "demo");
            assert_eq!(tool, "echo");
            assert_eq!(args, r#"{"message":"hi"}"#);
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_parse_call_defaults_to_empty_args() {
        let cli = Cli::try_parse_from(["mcphub", "call", "demo", "server_info"]).unwrap();
        if let Commands::Call { args, .. } = cli.command {
            assert_eq!(args, "{}");
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_parse_schema_requires_tool() {
        assert!(Cli::try_parse_from(["mcphub", "schema", "demo"]).is_err());
        let cli = Cli::try_parse_from(["mcphub", "schema", "demo", "echo"]).unwrap();
        assert!(matches!(cli.command, Commands::Schema { .. }));
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "mcphub",
            "--verbose",
            "--config",
            "custom.yaml",
            "servers",
            "--retry-attempts",
            "5",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some("custom.yaml".to_string()));
        assert_eq!(cli.retry_attempts, Some(5));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["mcphub"]).is_err());
    }
}
