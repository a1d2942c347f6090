//! downsync: mirror files changed inside Kubernetes containers back to the
//! local machine.
//!
//! # Usage
//!
//! ```text
//! downsync agent --command <prog,args...> --targets <dir,...> [--excludes <glob,...>] [--socket <path>]
//! downsync connect [--socket <path>]
//! downsync controller [--config downsync.yaml] [--build image=tag ...] [--namespace <ns>]
//! ```
//!
//! `agent` and `connect` run inside the container; `controller` runs on the
//! developer's machine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{agent::AgentArgs, connect::ConnectArgs, controller::ControllerArgs};

#[derive(Parser, Debug)]
#[command(
    name = "downsync",
    version,
    about = "Mirror files changed inside Kubernetes containers to the local filesystem",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Supervise the application, watch its files and serve them over a socket.
    Agent(AgentArgs),

    /// Relay stdin/stdout to the agent socket (run via `kubectl exec -i`).
    Connect(ConnectArgs),

    /// Discover matching containers and mirror their changes locally.
    Controller(ControllerArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    downsync_agent::init_tracing();
    match cli.command {
        Commands::Agent(args) => args.run(),
        Commands::Connect(args) => args.run(),
        Commands::Controller(args) => args.run(),
    }
}
