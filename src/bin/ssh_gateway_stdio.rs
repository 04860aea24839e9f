#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem_mcpserver::McpServer;
use ssh_gateway::gateway::{Gateway, GatewayConfig, GatewayTools};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let gateway = Arc::new(Gateway::open(GatewayConfig::from_env()?).await?);
    poem_mcpserver::stdio::stdio(McpServer::new().tools(GatewayTools::new(gateway))).await?;
    Ok(())
}
