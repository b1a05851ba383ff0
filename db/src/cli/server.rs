use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Starts the minkv server
    Run(ServerConfig),
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    #[arg(long, default_value_t = 3000)]
    pub port: u16,
    #[clap(flatten)]
    pub common: CommandLineConfig,
}

#[derive(Args, Debug, Clone)]
pub struct CommandLineConfig {
    /// Host
    #[arg(long, default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    /// Log level
    #[arg(long, default_value_t = String::from("info"))]
    pub log_level: String,

    /// Maximum client connections allowed
    #[arg(long, default_value_t = 1000)]
    pub maximum_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            common: CommandLineConfig::default(),
        }
    }
}

impl Default for CommandLineConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            log_level: String::from("info"),
            maximum_clients: 1000,
        }
    }
}

impl ServerConfig {
    /// Lets the OS pick a free port; used by tests.
    pub fn os_select_port(mut self) -> Self {
        self.port = 0;
        self
    }

    pub fn host(mut self, host: String) -> Self {
        self.common.host = host;
        self
    }

    pub fn maximum_clients(mut self, maximum_clients: usize) -> Self {
        self.common.maximum_clients = maximum_clients;
        self
    }
}
