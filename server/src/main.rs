use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use shellcache_server::response_cache::memory::MemoryResponseStore;
use shellcache_server::response_cache::sqlite::SqliteResponseStore;
use shellcache_server::{
    HttpNetwork, Network, OfflineCacheWorker, ProxyState, ResponseStore, ServerConfig, WorkerHost,
    server,
};
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tower::Service;
use tracing::{debug, error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shellcache_server=debug".into()),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Shellcache stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BoxError> {
    let config = ServerConfig::from_env()?;

    let store: Arc<dyn ResponseStore> = if config.ephemeral {
        warn!("Ephemeral mode: cached responses are lost on exit");
        Arc::new(MemoryResponseStore::new())
    } else {
        // SHELLCACHE_STORAGE_DIR holds responses.db (SQLite response store)
        std::fs::create_dir_all(&config.storage_dir)?;
        info!("Storage directory: {}", config.storage_dir.display());
        Arc::new(SqliteResponseStore::new(config.database_path())?)
    };
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(config.upstream.clone())?);

    let worker_config = config.worker_config();
    info!(
        "Cache version {} with {} precached assets under {}",
        worker_config.cache_version(),
        worker_config.manifest().len(),
        worker_config.base_path().resolve()
    );
    let worker = OfflineCacheWorker::new(Arc::new(worker_config), store, network);

    // Install and activate before taking any traffic
    let host = WorkerHost::new(Arc::new(worker));
    host.start().await?;

    let state = Arc::new(ProxyState::new(host, config.upstream.clone()));
    let app = server::create_app(state.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(
        "Shellcache listening on http://{} in front of {} (HTTP/1.1 + HTTP/2)",
        config.listen_addr, config.upstream
    );

    // Use hyper's auto-negotiating server to support both HTTP/1.1 and HTTP/2
    let conn_builder = ConnBuilder::new(TokioExecutor::new());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
        };
        debug!("New connection from: {}", addr);
        let io = TokioIo::new(stream);
        let app_clone = app.clone();
        let conn_builder = conn_builder.clone();

        tokio::spawn(async move {
            if let Err(err) = conn_builder
                .serve_connection_with_upgrades(
                    io,
                    hyper::service::service_fn(move |req| app_clone.clone().call(req)),
                )
                .await
            {
                // Check if the error is an io::Error indicating a normal close
                let is_normal_close = err
                    .source()
                    .and_then(|e| e.downcast_ref::<io::Error>())
                    .map(|io_err| {
                        matches!(
                            io_err.kind(),
                            io::ErrorKind::ConnectionReset
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::UnexpectedEof
                        )
                    })
                    .unwrap_or(false);

                if is_normal_close {
                    debug!("Connection from {} closed normally", addr);
                } else {
                    error!("Error serving connection from {}: {}", addr, err);
                }
            }
        });
    }

    // Let pending background cache writes finish
    state.host.drain().await;
    Ok(())
}
