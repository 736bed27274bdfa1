use clap::Parser;

use mandi_config::Config;
use mandi_runtime::build_runtime;

/// Conversational commerce orchestrator. All configuration comes from the
/// environment; see the README for the enumerated keys.
#[derive(Debug, Parser)]
#[command(name = "mandi-server")]
struct Args {
    /// Log filter, e.g. "info" or "mandi_runtime=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log)),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            std::process::exit(2);
        }
    };

    let app = match build_runtime(config).await {
        Ok(app) => app,
        Err(err) => {
            eprintln!("startup failed: {}", err);
            std::process::exit(err.exit_code());
        }
    };

    if let Err(err) = mandi_server::run_server(app).await {
        eprintln!("server terminated with error: {}", err);
        std::process::exit(1);
    }
}
