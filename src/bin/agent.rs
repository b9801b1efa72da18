//! Tail-based sampling agent entry point.

use tailsample::cli::{self, AgentCli};
use tailsample::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = AgentCli::parse_args();
    cli::run_agent(cli).await
}
