use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{Local, NaiveDate};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::forecast::{ForecastError, ForecastGenerator};
use crate::live::{LiveClient, LiveStatus};
use crate::model::LoadedModel;
use crate::summary::{Dashboard, Summary};
use crate::types::ForecastPoint;

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<LoadedModel>,
    pub client: Arc<LiveClient>,
    pub cfg: Arc<Config>,
}

impl AppState {
    pub fn new(cfg: Config, model: LoadedModel) -> Self {
        Self {
            client: Arc::new(LiveClient::new(cfg.feed.clone())),
            model: Arc::new(model),
            cfg: Arc::new(cfg),
        }
    }

    fn rng(&self) -> StdRng {
        match self.cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Fetch, forecast and aggregate. Runs top to bottom once per request.
pub async fn run_pipeline(state: &AppState, today: NaiveDate) -> Result<Dashboard, ForecastError> {
    let live = LiveStatus::resolve(state.client.fetch().await, state.cfg.fallback_aqi);
    if let Some(w) = live.warning() {
        tracing::warn!("{}", w);
    }
    let points = ForecastGenerator::new(&state.model, state.cfg.blend, state.rng())
        .generate(today, live.index() as f64)?;
    Ok(Dashboard::build(&state.cfg.feed.location_name, live, &points))
}

// ---------- Handlers ----------

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal(e: ForecastError) -> ApiError {
    tracing::error!("pipeline failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

async fn dashboard(State(state): State<AppState>) -> Result<Json<Dashboard>, ApiError> {
    let today = Local::now().date_naive();
    run_pipeline(&state, today).await.map(Json).map_err(internal)
}

#[derive(Serialize)]
struct ForecastOut {
    base_index: i64,
    points: Vec<ForecastPoint>,
    summary: Option<Summary>,
}

async fn forecast(State(state): State<AppState>) -> Result<Json<ForecastOut>, ApiError> {
    let today = Local::now().date_naive();
    let dash = run_pipeline(&state, today).await.map_err(internal)?;
    Ok(Json(ForecastOut {
        base_index: dash.live.index(),
        points: dash.forecast.iter().map(|p| p.point).collect(),
        summary: dash.summary,
    }))
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "features": state.model.feature_names().len() }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/forecast", get(forecast))
        .route("/healthz", get(healthz))
        .with_state(state)
}
