mod server;

pub use server::{Cli, CommandLineConfig, Commands, ServerConfig};
