use clap::Parser;
use std::error::Error;
use tracing_subscriber::EnvFilter;

pub mod cli;
mod client;
mod engine;
mod errors;
mod server;

#[cfg(test)]
mod tests;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli::Cli::parse();
    match &cli.command {
        cli::Commands::Run(config) => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(&config.common.log_level))
                .init();
            let server = server::handler::Server::new(config)?;
            server.start().await?;
        }
    }
    Ok(())
}
