use std::error::Error;

mod server;
mod sql;

use clap::Parser;
use init_tracing_opentelemetry::tracing_subscriber_ext::init_subscribers;

#[derive(Parser)]
struct ServerOptions {
    #[arg(long, env, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_subscribers()?;

    let router = server::router();

    let options = ServerOptions::parse();

    let address = format!("0.0.0.0:{}", options.port).parse()?;

    tracing::info!(%address, "starting server");

    axum::Server::bind(&address)
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
