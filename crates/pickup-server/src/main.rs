#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use core::net::SocketAddr;
use futures::Stream;
use pickup_core::{
    Backend,
    notify::{Consumer, LoggingHandler},
};
use server::{
    config::{CliArgs, ServerConfig},
    telemetry::init_telemetry,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    signal,
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Server, server::Connected};
use tonic_health::{ServingStatus, server::HealthReporter};

/// Name the backend reports under in the health service.
const SERVICE_NAME: &str = "pickup.Backend";

// Global allocator override
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;
    let providers = init_telemetry(config.log_format)?;

    let backend = Backend::connect(config.backend.clone()).await?;
    if config.seed {
        let inserted = backend.seed().await?;
        tracing::info!(inserted, "reference data seeded");
    }

    let token = CancellationToken::new();
    let sweep = backend
        .sweep()
        .spawn(config.sweep_interval, token.clone());
    let consumer = Consumer::new(
        backend.event_log().clone(),
        LoggingHandler,
        config.consumer.clone(),
    );
    let consumer = tokio::spawn({
        let token = token.clone();
        async move { consumer.run(token).await }
    });

    let tcp = TcpListener::bind(config.server_addr).await?;
    let addr = tcp.local_addr()?;
    log_startup_info(&config, addr);

    let served = serve(TcpListenerStream::new(tcp), token.clone()).await;

    // The server may also stop on a transport error.
    token.cancel();
    for (name, task) in [("sweep", sweep), ("consumer", consumer)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, "background task failed: {e}");
        }
    }
    let stopped = backend.shutdown().await;
    tracing::info!("server stopped");
    providers.shutdown();

    stopped?;
    served?;
    Ok(())
}

async fn serve<I, IO, IE>(incoming: I, token: CancellationToken) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_service_status(SERVICE_NAME, ServingStatus::Serving)
        .await;

    Server::builder()
        .add_service(health_service)
        .serve_with_incoming_shutdown(incoming, shutdown_signal(health_reporter, token))
        .await?;

    Ok(())
}

fn log_startup_info(config: &ServerConfig, addr: SocketAddr) {
    tracing::info!(
        %addr,
        workers = config.backend.scheduler.workers,
        queue_capacity = config.backend.scheduler.queue_capacity,
        database = %config.backend.pool.url,
        max_connections = config.backend.pool.max_connections,
        topic = %config.backend.events_topic,
        group = %config.consumer.group,
        "pickup backend listening"
    );

    #[cfg(debug_assertions)]
    tracing::debug!("{config:#?}");
}

/// Resolves on Ctrl+C, SIGTERM, or an internal cancellation, after marking
/// the backend as not serving.
async fn shutdown_signal(health_reporter: HealthReporter, token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
        () = token.cancelled() => tracing::info!("shutdown requested"),
    }

    health_reporter
        .set_service_status(SERVICE_NAME, ServingStatus::NotServing)
        .await;
    token.cancel();
    tracing::info!("stopping background tasks");
}
