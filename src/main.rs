use anyhow::Context;
use aqi_forecast::{config::Config, model::LoadedModel, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = Config::from_env().context("failed to load config")?;

    // No model, no dashboard.
    let model = LoadedModel::load(&cfg.model_path, &cfg.feature_path)
        .with_context(|| format!("failed to load model from {}", cfg.model_path.display()))?;
    let warm = model.warmup().context("warmup inference failed")?;
    tracing::info!("warmup forward ok ({:.2})", warm);
    tracing::info!(
        "loaded model; feature_names[{}]: {:?}",
        model.feature_names().len(),
        model.feature_names()
    );

    let port = cfg.port;
    let app = server::router(server::AppState::new(cfg, model));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
