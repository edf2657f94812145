use crate::{
    config::{LayeredArgs, ServerArgs},
    logging::Logger,
};
use clap::{Args, Parser, Subcommand};

mod serve;

pub use serve::serve;

#[derive(Parser, Debug)]
#[command(name = "handover")]
#[command(version, about = "Serve HTTP on an inherited or fresh listener with graceful shutdown", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the built-in echo handler until SIGINT or SIGTERM
    Serve(Box<ServeArgs>),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen and shutdown configuration
    #[command(flatten, next_help_heading = "Server Configuration")]
    pub server: LayeredArgs<ServerArgs>,

    /// Logging configuration
    #[command(flatten)]
    pub logger: Logger,
}
