//! `downsync agent`: the in-container file server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use downsync_agent::{start_blocking, AgentOptions, DEFAULT_SOCKET_PATH};

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Application to run, comma separated: program first, then its arguments.
    #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
    pub command: Vec<String>,

    /// Directories to watch, comma separated.
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub targets: Vec<PathBuf>,

    /// Glob patterns never reported, comma separated.
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub excludes: Vec<String>,

    /// Unix socket the tunnel peer connects to.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
}

impl AgentArgs {
    pub fn run(self) -> Result<()> {
        let code = start_blocking(AgentOptions {
            command: self.command,
            targets: self.targets,
            excludes: self.excludes,
            socket: self.socket,
        })
        .context("agent exited with error")?;
        std::process::exit(code);
    }
}
