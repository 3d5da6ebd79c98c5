use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let boot = llmproxy_core::bootstrap_from_env().await?;
    let global = boot.state.global.load();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&global.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind = format!("{}:{}", global.host, global.port);

    let app = llmproxy_core::http::router(boot.state.clone())
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(event = "listening", addr = %bind, "llmproxy listening");
    axum::serve(listener, app).await?;
    Ok(())
}
