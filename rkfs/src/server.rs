use crate::backend::{LocalFsFactory, SessionFactory};
use crate::config::Config;
use crate::reaper::Reaper;
use crate::registry::Registry;
use crate::service::StreamService;
use crate::tls::make_server_endpoint;
use anyhow::{Context, Result};
use common::{FsRequest, FsResponse, RkfsError};
use log::{debug, error, info, warn};
use quinn::{Connection, Endpoint, RecvStream, SendStream};
use std::sync::Arc;

/// Wire the backend, registry, service and reaper described by `cfg`.
pub fn build_service(cfg: &Config) -> Result<(Arc<StreamService>, Reaper)> {
    let factory: Arc<dyn SessionFactory> = Arc::new(
        LocalFsFactory::from_uri(&cfg.fs_uri)
            .with_context(|| format!("unusable fs_uri {}", cfg.fs_uri))?,
    );
    let registry = Registry::spawn();
    let service = Arc::new(StreamService::new(
        factory.clone(),
        registry.clone(),
        cfg.max_read_bytes,
    ));
    let reaper = Reaper::new(
        registry,
        factory,
        cfg.idle_threshold(),
        cfg.reaper_interval(),
    )
    .with_close_timeout(cfg.close_timeout());
    Ok((service, reaper))
}

/// launch the rkfs server: start the reaper, then accept QUIC connections until
/// the endpoint closes.
pub async fn serve(cfg: Config) -> Result<()> {
    let endpoint = make_server_endpoint(cfg.addr.parse().context("invalid listen address")?)?;
    let (service, reaper) = build_service(&cfg)?;
    info!(
        "rkfs listening on {} serving {} (idle threshold {}s, reaper every {}s)",
        endpoint.local_addr()?,
        cfg.fs_uri,
        cfg.idle_threshold_secs,
        cfg.reaper_interval_secs
    );
    let reaper_task = reaper.spawn();
    run_endpoint(endpoint, service, cfg.max_request_bytes).await;
    reaper_task.abort();
    Ok(())
}

/// spawn a new task for each accepted connection.
pub async fn run_endpoint(endpoint: Endpoint, service: Arc<StreamService>, max_request: usize) {
    while let Some(incoming) = endpoint.accept().await {
        let service = service.clone();
        tokio::spawn(async move {
            match incoming.await {
                Ok(conn) => {
                    debug!("connection accepted: addr={}", conn.remote_address());
                    handle_connection(conn, service, max_request).await;
                }
                Err(e) => error!("failed to establish connection: {e}"),
            }
        });
    }
}

/// every bidirectional stream carries exactly one call.
async fn handle_connection(conn: Connection, service: Arc<StreamService>, max_request: usize) {
    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_call(send, recv, &service, max_request).await {
                        warn!("call failed: {e:#}");
                    }
                });
            }
            Err(e) => {
                debug!("connection {} ended: {e}", conn.remote_address());
                break;
            }
        }
    }
}

async fn handle_call(
    mut send: SendStream,
    mut recv: RecvStream,
    service: &StreamService,
    max_request: usize,
) -> Result<()> {
    let resp = match recv.read_to_end(max_request).await {
        Ok(raw) => match bincode::deserialize::<FsRequest>(&raw) {
            Ok(req) => {
                let op = req.op.name();
                let resp = service.dispatch(req).await;
                if let Err(e) = &resp {
                    debug!("{op} failed: {e}");
                }
                resp
            }
            Err(e) => {
                warn!("undecodable request: {e}");
                bad_request(format!("undecodable request: {e}"))
            }
        },
        Err(e) => {
            warn!("failed to read request: {e}");
            bad_request(format!("failed to read request: {e}"))
        }
    };

    let data = bincode::serialize(&resp)?;
    send.write_all(&data).await?;
    send.finish()?;
    Ok(())
}

fn bad_request(msg: String) -> FsResponse {
    Err(RkfsError::Io(msg))
}
