use clap::Parser;
use vdl_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(err) = cli.run().await {
        eprintln!("vdl error: {:#}", err);
        std::process::exit(1);
    }
}
