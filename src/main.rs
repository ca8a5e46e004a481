// IPMS - personal management assistant
// Main entry point

use clap::Parser;

use ipms::cli::{self, Cli};
use ipms::logging::init_tracing;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = cli::run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
