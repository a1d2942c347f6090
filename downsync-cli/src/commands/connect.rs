//! `downsync connect`: tunnel peer between `kubectl exec` stdio and the agent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use downsync_agent::{connect_blocking, DEFAULT_SOCKET_PATH};

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Agent socket to relay to.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
}

impl ConnectArgs {
    pub fn run(self) -> Result<()> {
        connect_blocking(&self.socket)
            .with_context(|| format!("cannot reach agent at {}", self.socket.display()))
    }
}
