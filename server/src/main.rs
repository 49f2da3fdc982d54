use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matmul_server::config::ServerConfig;
use matmul_server::grpc;
use matrix_mul::{Dispatcher, WorkerPool};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matmul_server=info,matrix_mul=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(addr = %config.addr, workers = config.workers, "Loaded server configuration");

    let pool = WorkerPool::new(config.workers)?;
    let shutdown = CancellationToken::new();
    let server = grpc::create_server(Dispatcher::new(pool), shutdown.clone());

    tracing::info!(addr = %config.addr, "Starting the server");
    Server::builder()
        .add_service(server)
        .serve_with_shutdown(config.addr, async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
