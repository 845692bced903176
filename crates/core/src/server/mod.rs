use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use crate::culture::RequestCulture;
use crate::localizer::{DynamicLocalizer, LocalizerStatus, ReloadOutcome};
use crate::negotiate::{CultureNegotiator, RequestCultureFeature, localize_request};

mod watch;

pub use watch::{ResourceWatcher, spawn_periodic_reload};

#[derive(Clone)]
pub struct AppState {
    pub localizer: Arc<DynamicLocalizer>,
    pub negotiator: Arc<CultureNegotiator>,
}

/// Run a reload on the blocking pool; the loader may do I/O.
pub async fn reload_blocking(localizer: Arc<DynamicLocalizer>) -> anyhow::Result<ReloadOutcome> {
    let outcome = tokio::task::spawn_blocking(move || localizer.reload()).await?;
    Ok(outcome)
}

pub fn router(state: AppState) -> Router {
    #[derive(Serialize)]
    struct TextResponse {
        key: String,
        text: String,
        found: bool,
        culture: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    }

    #[derive(Serialize)]
    struct CultureResponse {
        culture: String,
        ui_culture: String,
        key_suffix: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    }

    #[derive(Serialize)]
    struct ReloadResponse {
        outcome: ReloadOutcome,
        status: LocalizerStatus,
    }

    async fn get_text(
        State(state): State<AppState>,
        Extension(feature): Extension<RequestCultureFeature>,
        Path(key): Path<String>,
        Query(params): Query<Vec<(String, String)>>,
    ) -> Json<TextResponse> {
        let args: Vec<&str> = params
            .iter()
            .filter(|(k, _)| k == "arg")
            .map(|(_, v)| v.as_str())
            .collect();
        let culture = &feature.request_culture.culture;
        let resolved = if args.is_empty() {
            state.localizer.lookup(culture, &key)
        } else {
            let args: Vec<&dyn std::fmt::Display> =
                args.iter().map(|a| a as &dyn std::fmt::Display).collect();
            state.localizer.lookup_formatted(culture, &key, &args)
        };
        Json(TextResponse {
            key: resolved.key,
            text: resolved.text,
            found: resolved.found,
            culture: culture.to_string(),
            provider: feature.provider_name().map(str::to_string),
        })
    }

    async fn get_culture(
        State(state): State<AppState>,
        Extension(feature): Extension<RequestCultureFeature>,
    ) -> Json<CultureResponse> {
        let RequestCulture {
            culture,
            ui_culture,
        } = &feature.request_culture;
        Json(CultureResponse {
            culture: culture.to_string(),
            ui_culture: ui_culture.to_string(),
            key_suffix: state.localizer.culture_tag(culture),
            provider: feature.provider_name().map(str::to_string),
        })
    }

    async fn reload(
        State(state): State<AppState>,
    ) -> Result<Json<ReloadResponse>, (StatusCode, String)> {
        let outcome = reload_blocking(Arc::clone(&state.localizer))
            .await
            .map_err(|e| {
                warn!("reload task failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            })?;
        info!(generation = outcome.generation(), loaded = outcome.is_loaded(), "reload requested over http");
        Ok(Json(ReloadResponse {
            outcome,
            status: state.localizer.status(),
        }))
    }

    async fn status(State(state): State<AppState>) -> Json<LocalizerStatus> {
        Json(state.localizer.status())
    }

    Router::new()
        .route("/v1/text/{key}", get(get_text))
        .route("/v1/culture", get(get_culture))
        .route("/v1/reload", post(reload))
        .route("/v1/status", get(status))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.negotiator),
            localize_request,
        ))
        .with_state(state)
}
