use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use tgsend::commands;
use tgsend::config::Args;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "tgsend=warn",
        1 => "tgsend=info",
        _ => "tgsend=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let code = match commands::run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            2
        }
    };
    std::process::exit(code);
}
