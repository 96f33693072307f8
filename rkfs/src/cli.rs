use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rkfs", version, about = "RKFS daemon and client CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Clone)]
pub struct ClientOpts {
    /// rkfs server address (defaults to $RKFS_ADDR, then 127.0.0.1:43345)
    #[arg(long)]
    pub addr: Option<String>,
    /// identity to act as (defaults to $USER)
    #[arg(short, long)]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the RKFS daemon with config file
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List a directory, or show a single file
    Ls {
        path: String,
        #[command(flatten)]
        opts: ClientOpts,
    },
    /// Upload a local file
    Put {
        local: PathBuf,
        remote: String,
        #[command(flatten)]
        opts: ClientOpts,
    },
    /// Download a remote file
    Get {
        remote: String,
        local: PathBuf,
        #[command(flatten)]
        opts: ClientOpts,
    },
    /// Delete a remote path
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
        #[command(flatten)]
        opts: ClientOpts,
    },
}
