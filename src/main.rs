use clap::Parser;
use tracing_subscriber::EnvFilter;

use support_finder::cli::{self, Cli, Commands};
use support_finder::error::FinderError;
use support_finder::server;
use support_finder::services::Services;

fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn serve(cli: &Cli, host: &str, port: u16) -> anyhow::Result<()> {
    let config = cli::load_config(cli)?;
    let services = Services::open(config).await?;
    server::run_http(services, host, port).await
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let serve_target = match &cli.command {
        Commands::Serve { host, port } => Some((host.clone(), *port)),
        _ => None,
    };

    if let Some((host, port)) = serve_target {
        init_tracing("info");
        return match serve(&cli, &host, port).await {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("Error: {err}");
                std::process::ExitCode::from(1)
            }
        };
    }

    init_tracing("warn");
    match cli::run(cli).await {
        Ok(output) => {
            println!("{output}");
            std::process::ExitCode::SUCCESS
        }
        Err(err) => {
            if let Some(finder_err) = err.downcast_ref::<FinderError>() {
                eprintln!("Error: {finder_err}");
            } else {
                eprintln!("Error: {err}");
            }
            std::process::ExitCode::from(1)
        }
    }
}
