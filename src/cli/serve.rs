use anyhow::Result;
use tracing::info;

use codelore::mcp::McpServer;
use codelore::Codelore;

/// Start MCP server with stdio transport.
/// Everything human-readable goes to stderr; stdout carries the protocol.
pub async fn serve_stdio(project: String) -> Result<()> {
    let app = Codelore::open(&project)?;

    info!("MCP server (stdio) for project: {}", app.workspace().display());

    let stats = app.index().get_index_stats(false)?;
    if stats.files == 0 {
        eprintln!(
            "Warning: no files indexed yet. Run 'codelore index --project {}' or call index_workspace.",
            project
        );
    }

    let server = McpServer::new(app);
    server.run().await?;

    Ok(())
}
