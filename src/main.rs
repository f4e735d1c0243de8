use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};
use warp::Filter;

use room_hub::config::{self, Config, TlsPaths};
use room_hub::filter::ProfanityFilter;
use room_hub::hub::{Hub, HubConfig};
use room_hub::lifecycle::{RoomLifecycle, StaticTopics};
use room_hub::pipeline::{self, Pipeline};
use room_hub::server::Server;
use room_hub::store::{MemoryMessageStore, MemoryRoomStore, MemoryStatsStore};

/// Checks that the configured PEM files hold at least one certificate and a
/// private key before handing them to warp.
fn check_tls(paths: &TlsPaths) -> Result<(), String> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| format!("failed to open {}: {}", path.display(), e))
    };

    let mut cert_reader = open(paths.cert.as_path())?;
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("failed to parse certificate: {e}"))?;
    if certs.is_empty() {
        return Err(format!("no certificate in {}", paths.cert.display()));
    }

    let mut key_reader = open(paths.key.as_path())?;
    match rustls_pemfile::private_key(&mut key_reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(format!("no private key in {}", paths.key.display())),
        Err(e) => Err(format!("failed to parse private key: {e}")),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() {
    let env_file = config::load_env_file();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match env_file {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => warn!("No .env file loaded: {}", e),
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let rooms = Arc::new(MemoryRoomStore::new());
    let messages = Arc::new(MemoryMessageStore::new());
    let stats = Arc::new(MemoryStatsStore::new());

    let filter = match ProfanityFilter::standard() {
        Ok(filter) => filter,
        Err(e) => {
            error!("Failed to build room name filter: {}", e);
            std::process::exit(1);
        }
    };

    let (pipeline, reports) = Pipeline::with_backlog(
        messages.clone(),
        stats,
        config.pipeline_concurrency,
        config.pipeline_backlog,
    );
    tokio::spawn(pipeline::supervise(reports));

    let (hub, handle) = Hub::new(HubConfig::from(&config), messages, pipeline);
    tokio::spawn(hub.run());

    let lifecycle = Arc::new(RoomLifecycle::new(
        rooms,
        Arc::new(StaticTopics::default()),
        handle.clone(),
        filter,
        config.max_rooms,
        config.room_ttl,
    ));
    tokio::spawn(Arc::clone(&lifecycle).run_cleanup_job(config.cleanup_interval));

    let routes = Server::new(handle, lifecycle, config.client_queue_capacity)
        .routes()
        .or(warp::fs::dir(config.static_dir.clone()))
        .with(warp::cors().allow_any_origin());

    let tls = config.tls.as_ref().and_then(|paths| match check_tls(paths) {
        Ok(()) => Some(paths),
        Err(e) => {
            warn!("TLS disabled: {}", e);
            None
        }
    });

    match tls {
        Some(paths) => {
            let (addr, server) = warp::serve(routes)
                .tls()
                .cert_path(&paths.cert)
                .key_path(&paths.key)
                .bind_with_graceful_shutdown(config.bind_addr, shutdown_signal());
            info!("Listening on https://{}", addr);
            server.await;
        }
        None => {
            let (addr, server) =
                warp::serve(routes).bind_with_graceful_shutdown(config.bind_addr, shutdown_signal());
            info!("Listening on http://{}", addr);
            server.await;
        }
    }
}
