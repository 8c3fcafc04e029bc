//! Tool-calling protocol boundary over stdio.

pub mod server;
pub mod tools;

use rmcp::ServiceExt;
use tracing::info;

use crate::app::App;

pub use server::BloomeoServer;

/// Serves every tool over stdin/stdout until the client disconnects.
pub async fn serve_stdio(app: App) -> anyhow::Result<()> {
    info!(
        tools = tools::TOOLS.len(),
        credential = app.has_token(),
        "starting MCP server on stdio"
    );
    let service = BloomeoServer::new(app)
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await?;
    service.waiting().await?;
    Ok(())
}
