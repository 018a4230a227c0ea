use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triton_openai_adapter::config::AdapterConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,triton_openai_adapter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env()?;
    let state = triton_openai_adapter::build_state(&config)?;
    let app = triton_openai_adapter::build_app(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "adapter listening");

    axum::serve(listener, app).await?;
    Ok(())
}
