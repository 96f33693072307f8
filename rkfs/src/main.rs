mod cli;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use cli::{Cli, ClientOpts, Commands};
use common::FileStatus;
use log::info;
use rkfs::client::RkfsClient;
use rkfs::config::{DEFAULT_ADDR, load_config};
use rkfs::server::serve;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => {
            let path = config
                .to_str()
                .context("config path is not valid UTF-8")?;
            let cfg = load_config(path)?;
            info!("[rkfs] starting with config {path}");
            serve(cfg).await?;
        }
        Commands::Ls { path, opts } => {
            let client = connect(&opts).await?;
            for st in client.list_status(&path).await? {
                println!("{}", format_status(&st));
            }
        }
        Commands::Put {
            local,
            remote,
            opts,
        } => {
            let client = connect(&opts).await?;
            let n = client.upload(&local, &remote).await?;
            println!("uploaded {n} bytes to {remote}");
        }
        Commands::Get {
            remote,
            local,
            opts,
        } => {
            let client = connect(&opts).await?;
            let n = client.download(&remote, &local).await?;
            println!("downloaded {n} bytes to {}", local.display());
        }
        Commands::Rm {
            path,
            recursive,
            opts,
        } => {
            let client = connect(&opts).await?;
            if !client.remove(&path, recursive).await? {
                bail!("{path}: no such file or directory");
            }
        }
    }

    Ok(())
}

async fn connect(opts: &ClientOpts) -> Result<RkfsClient> {
    let addr = opts
        .addr
        .clone()
        .or_else(|| env::var("RKFS_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let user = match opts.user.clone().or_else(|| env::var("USER").ok()) {
        Some(u) => u,
        None => bail!("no identity: pass --user or set USER"),
    };
    RkfsClient::connect(&addr, &user).await
}

fn format_status(st: &FileStatus) -> String {
    let kind = if st.is_dir { 'd' } else { '-' };
    let replication = if st.is_dir {
        "-".to_string()
    } else {
        st.replication.to_string()
    };
    let modified = DateTime::<Utc>::from_timestamp_millis(st.mod_time)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    format!(
        "{kind}{} {:>3} {} {} {:>12} {} {}",
        st.permission, replication, st.owner, st.group, st.length, modified, st.name
    )
}
