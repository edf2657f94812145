use clap::Parser;
use handover::cmd;
use handover::cmd::{Cli, Command};
use std::process::{ExitCode, Termination};

mod exits;

use exits::HandoverExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Serve(args) => cmd::serve(*args).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => HandoverExitCode(e).report(),
    }
}
