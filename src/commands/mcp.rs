//! MCP command handlers
//!
//! Every handler builds an [`McpManager`] from configuration, initializes
//! it, reports, and disconnects before returning.

use crate::cli::Commands;
use crate::config::Config;
use crate::error::{McpHubError, Result};
use crate::mcp::catalog::ToolDescriptor;
use crate::mcp::manager::{McpManager, ServerStatus, StatusSnapshot};
use crate::mcp::registry::ConnectionStatus;
use anyhow::Context;
use colored::{ColoredString, Colorize};
use prettytable::{format, Table};
use serde_json::Value;

/// Run one CLI command against a freshly initialized manager.
///
/// # Returns
///
/// Returns `Ok(false)` when the command ran but reported a failure, such as
/// an unsuccessful tool call.
///
/// # Errors
///
/// Returns an error for invalid configuration or arguments, unknown servers
/// and unknown tools.
///
/// # Examples
///
/// ```no_run
/// use mcphub::cli::Commands;
/// use mcphub::commands::mcp::handle_command;
/// use mcphub::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let ok = handle_command(Commands::Servers { json: false }, Config::default()).await?;
/// assert!(ok);
/// # Ok(())
/// # }
/// ```
pub async fn handle_command(command: Commands, config: Config) -> Result<bool> {
    let manager = McpManager::new(&config.mcp)?;
    manager.initialize().await;

    let result = match command {
        Commands::Servers { json } => list_servers(&manager, json).await.map(|_| true),
        Commands::Tools { server, json } => list_tools(&manager, server.as_deref(), json)
            .await
            .map(|_| true),
        Commands::Call { server, tool, args } => call_tool(&manager, &server, &tool, &args).await,
        Commands::Schema { server, tool } => show_schema(&manager, &server, &tool).await.map(|_| true),
    };

    manager.shutdown().await;
    result
}

/// Print every server with its status.
///
/// # Errors
///
/// Returns `McpHubError::Serialization` if JSON output fails
pub async fn list_servers(manager: &McpManager, json: bool) -> Result<()> {
    let snapshot = manager.status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot).map_err(McpHubError::Serialization)?);
        return Ok(());
    }

    if snapshot.servers.is_empty() {
        println!("{}", "No MCP servers configured.".yellow());
        return Ok(());
    }

    output_servers_table(&snapshot);
    Ok(())
}

/// Print connected servers' tools, optionally for one server only.
///
/// # Errors
///
/// Returns `McpHubError::ServerNotFound` for an unknown `server`
pub async fn list_tools(manager: &McpManager, server: Option<&str>, json: bool) -> Result<()> {
    let tools = match server {
        Some(id) => {
            if manager.server(id).await.is_none() {
                return Err(McpHubError::ServerNotFound(id.to_string()).into());
            }
            manager.tools_for_server(id).await
        }
        None => manager.list_all_tools().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&tools).map_err(McpHubError::Serialization)?);
        return Ok(());
    }

    if tools.is_empty() {
        println!("{}", "No tools available.".yellow());
        return Ok(());
    }

    output_tools_table(&tools);
    Ok(())
}

/// Call a tool and print the `{success, data, error}` response.
///
/// # Returns
///
/// Returns whether the call succeeded
///
/// # Errors
///
/// Returns an error if `args` is not a JSON object
pub async fn call_tool(manager: &McpManager, server: &str, tool: &str, args: &str) -> Result<bool> {
    let arguments: Value =
        serde_json::from_str(args).with_context(|| format!("--args is not valid JSON: {args}"))?;
    if !arguments.is_object() {
        anyhow::bail!("--args must be a JSON object, got: {args}");
    }

    let response = manager.invoke(server, tool, arguments).await;
    println!("{}", serde_json::to_string_pretty(&response).map_err(McpHubError::Serialization)?);
    Ok(response.success)
}

/// Print the translated parameter schema of a tool.
///
/// # Errors
///
/// Returns `McpHubError::ServerNotFound` or `McpHubError::ToolNotFound`
pub async fn show_schema(manager: &McpManager, server: &str, tool: &str) -> Result<()> {
    let schema = manager.tool_schema(server, tool).await?;
    println!("{}", serde_json::to_string_pretty(&*schema).map_err(McpHubError::Serialization)?);
    Ok(())
}

fn status_label(status: ConnectionStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ConnectionStatus::Connected => label.green(),
        ConnectionStatus::Connecting => label.yellow(),
        ConnectionStatus::Error => label.red(),
        ConnectionStatus::Disconnected => label.dimmed(),
    }
}

fn describe_server(server: &ServerStatus) -> String {
    match &server.last_error {
        Some(error) => error.clone(),
        None => server.endpoint.clone().unwrap_or_else(|| "(offline)".to_string()),
    }
}

fn output_servers_table(snapshot: &StatusSnapshot) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Name".bold(),
        "Status".bold(),
        "Transport".bold(),
        "Tools".bold(),
        "Retries".bold(),
        "Endpoint / Error".bold()
    ]);

    for server in &snapshot.servers {
        let transport = server
            .active_transport
            .map(|k| k.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(prettytable::row![
            server.id.cyan(),
            server.name,
            status_label(server.status),
            transport,
            server.tool_count,
            server.retry_count,
            describe_server(server)
        ]);
    }

    println!(
        "\nMCP servers ({} of {} connected):",
        snapshot.connected_count(),
        snapshot.servers.len()
    );
    table.printstd();
    println!();
}

fn output_tools_table(tools: &[ToolDescriptor]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row!["Server".bold(), "Tool".bold(), "Description".bold()]);

    for tool in tools {
        table.add_row(prettytable::row![
            tool.owner_server_id.cyan(),
            tool.name,
            tool.description
        ]);
    }

    println!("\nAvailable tools ({}):", tools.len());
    table.printstd();
    println!();
}
