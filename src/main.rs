mod auth;
mod buffer_pool;
mod config;
mod proxy;
mod relay;
mod tunnel;

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, ProxyConfig};
use crate::proxy::ProxyState;

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fwdproxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    color_eyre::install()?;

    let args = Cli::parse();

    // Configuration problems are fatal before the listener binds
    let config = ProxyConfig::from_cli(args)?;

    info!("fwdproxy");
    info!("port: {}", config.listen_addr.port());
    info!("buffer: {}", config.buffer_size);
    if config.auth.is_open() {
        info!("no credentials configured, running as an open proxy");
    }

    let state = ProxyState::new(config);
    let listener = TcpListener::bind(state.config.listen_addr).await?;

    let server = async {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("accept error: {err} (continuing)");
                    continue;
                }
            };

            let state = Arc::clone(&state);
            tokio::task::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| proxy::serve(Arc::clone(&state), req));

                if let Err(err) = http1::Builder::new()
                    .preserve_header_case(true)
                    .title_case_headers(true)
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!("connection from {peer_addr} ended with error: {err}");
                }
            });
        }
    };

    tokio::select! {
        _ = server => {
            warn!("listener loop terminated");
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
