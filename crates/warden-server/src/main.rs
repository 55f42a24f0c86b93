// SPDX-License-Identifier: AGPL-3.0-only
mod api;
mod config;
mod lifecycle;
mod metrics;
mod seed;
mod terminal;
mod tokens;

use crate::api::{AppState, build_api_router};
use crate::config::{Args, LogFormat};
use crate::lifecycle::{Lifecycle, ops_router};
use crate::seed::{DeviceTable, Seed};
use crate::tokens::SessionTokens;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use warden_auth::{AuthBroker, BackendKind, CredentialStore, DirectoryConnector, LdapConnector, MemoryStore};
use warden_relay::{CredentialMap, RelayDeps, SharedCredential, SshConnector, TerminalRelay};
use zeroize::Zeroize;

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_env_filter(filter);
    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();
    init_tracing(args.log_format)?;
    let relay_settings = args.relay_settings().map_err(|e| anyhow!(e))?;

    let store = Arc::new(MemoryStore::new());
    let credentials = CredentialStore::new(store.clone())?;
    let fallback = args
        .device_secret
        .as_ref()
        .map(|secret| SharedCredential::new(args.device_username.clone(), secret.as_str()));
    if let Some(secret) = args.device_secret.as_mut() {
        secret.zeroize();
    }
    let mut device_credentials = CredentialMap::new(fallback);
    let devices = match args.seed.as_ref() {
        Some(path) => Seed::load(path)?.apply(&store, &credentials, &mut device_credentials)?,
        None => {
            warn!("no --seed file given; starting with an empty user and device table");
            DeviceTable::default()
        }
    };

    let connector: Arc<dyn DirectoryConnector> = Arc::new(LdapConnector);
    let broker = Arc::new(AuthBroker::new(store.clone(), store.clone(), credentials, connector));
    for kind in [BackendKind::Directory, BackendKind::Tacacs, BackendKind::Radius] {
        if broker.is_configured(kind).await {
            info!(backend = %kind, "backend configured");
        }
    }

    let tokens = Arc::new(SessionTokens::new(args.token_ttl()));
    let relay = Arc::new(TerminalRelay::new(
        RelayDeps {
            tokens: tokens.clone(),
            users: store.clone(),
            devices: Arc::new(devices),
            credentials: Arc::new(device_credentials),
            connector: Arc::new(SshConnector::new(args.ssh_connect_timeout(), args.ssh_keepalive())),
            audit: store.clone(),
            accounting: broker.clone(),
        },
        relay_settings,
    ));

    let lifecycle = Lifecycle::new();
    let app = build_api_router(AppState {
        broker: broker.clone(),
        tokens,
        relay: relay.clone(),
        audit: store.clone(),
        lifecycle: lifecycle.clone(),
    })
    .merge(ops_router(lifecycle.clone(), relay.clone()));

    if let Some(path) = args.seed.clone() {
        tokio::spawn(watch_sighup(path, store.clone(), broker.clone()));
    }

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %args.listen, "listening");
    lifecycle.serve();

    let drain = Duration::from_secs(args.shutdown_drain_timeout_secs);
    let shutdown_lifecycle = lifecycle.clone();
    let shutdown_relay = relay.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_lifecycle.drain();
            let closed = shutdown_relay.close_all().await;
            info!(sessions = closed, "closing relay sessions");
            tokio::spawn(async move {
                tokio::time::sleep(drain).await;
                error!("drain timeout elapsed; exiting");
                std::process::exit(1);
            });
        })
        .await?;
    lifecycle.stop();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Re-reads backend settings from the seed file and resets every remote
/// backend so the next request picks them up.
async fn watch_sighup(path: PathBuf, store: Arc<MemoryStore>, broker: Arc<AuthBroker>) {
    match signal(SignalKind::hangup()) {
        Ok(mut stream) => {
            while stream.recv().await.is_some() {
                match Seed::load(&path) {
                    Ok(seed) => {
                        for (category, settings) in seed.settings {
                            store.set_settings(&category, settings);
                        }
                        for kind in [BackendKind::Directory, BackendKind::Tacacs, BackendKind::Radius] {
                            broker.reconfigure(kind).await;
                        }
                        info!("reloaded backend settings after SIGHUP");
                    }
                    Err(err) => warn!(error = %err, "failed to reload settings on SIGHUP"),
                }
            }
        }
        Err(err) => warn!(error = %err, "failed to install SIGHUP handler"),
    }
}
