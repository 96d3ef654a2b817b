/// Main entry point for the flowmill worker.
///
/// Loads configuration from the environment and starts the HTTP server plus
/// the bus consumers. The process runs until killed; losing the bus or
/// failing the initial dials exits non-zero.

use flowmill::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
