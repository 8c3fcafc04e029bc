use bloomeo_mcp::App;
use bloomeo_mcp::cli::{self, Cli, Commands};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP transport; logs go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "bloomeo_mcp=info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Mcp | Commands::Serve => {
            let app = App::from_config(cli.config())?;
            bloomeo_mcp::mcp::serve_stdio(app).await
        }
        Commands::Health => {
            let app = App::from_config(cli.config())?;
            let report = cli::health::check(&app).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.to_markdown());
            }
            if !report.all_healthy() {
                std::process::exit(1);
            }
            Ok(())
        }
        _ => {
            let output = cli::run(cli).await?;
            println!("{output}");
            Ok(())
        }
    }
}
