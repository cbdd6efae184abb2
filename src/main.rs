use clap::Parser;
use ru_processor::cli::{Args, commands};
use std::process;

fn main() {
    let args = Args::parse();
    commands::setup_logging(&args);

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    if let Err(error) = runtime.block_on(commands::run(args)) {
        eprintln!("Error: {:#}", error);
        process::exit(1);
    }
}
