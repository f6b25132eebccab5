use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = multipostctl::Cli::parse();
    let fallback = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(err) = multipostctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
