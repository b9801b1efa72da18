//! Tail-based sampling collector entry point.

use tailsample::cli::{self, CollectorCli};
use tailsample::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CollectorCli::parse_args();
    cli::run_collector(cli).await
}
