//! HTTP request handlers.

use super::AppState;
use crate::db::HistoryEntry;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Webhook
// ============================================================================

const WEBHOOK_ERROR: &str = "WebHook error: No sensor or state specified in request.";

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub sensor: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
}

/// Accepts `?sensor=<name>&state=<true|false>` on any path and method.
///
/// Unknown and excluded sensors get the same answer as known ones. A query
/// that does not parse is answered like one with missing parameters.
pub async fn handle_webhook(
    State(state): State<AppState>,
    query: Result<Query<WebhookQuery>, QueryRejection>,
) -> impl IntoResponse {
    let (sensor, new_state) = match query {
        Ok(Query(query)) => (
            query.sensor.filter(|s| !s.is_empty()),
            query.state.filter(|s| !s.is_empty()),
        ),
        Err(e) => {
            tracing::warn!("Malformed hook query: {}", e.body_text());
            (None, None)
        }
    };

    let (Some(sensor), Some(new_state)) = (sensor, new_state) else {
        tracing::warn!("{}", WEBHOOK_ERROR);
        return (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            WEBHOOK_ERROR,
        )
            .into_response();
    };

    tracing::info!("Received hook for {} -> {}", sensor, new_state);

    let disposition = state.presence.receive_webhook(&sensor, new_state == "true");
    tracing::debug!("Hook for {} handled as {:?}", sensor, disposition);

    Json(WebhookResponse { success: true }).into_response()
}

// ============================================================================
// API: Sensors
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub name: String,
    pub target: String,
    pub present: bool,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_webhook_at: Option<DateTime<Utc>>,
    pub pending_webhook: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AggregateStatus {
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Serialize)]
pub struct AggregatesStatus {
    pub anyone: Option<AggregateStatus>,
    pub no_one: Option<AggregateStatus>,
}

#[derive(Debug, Serialize)]
pub struct SensorsResponse {
    pub targets: Vec<TargetStatus>,
    pub aggregates: AggregatesStatus,
}

pub async fn handle_get_sensors(State(state): State<AppState>) -> impl IntoResponse {
    let presence = &state.presence;
    let queue = presence.queue();

    let targets = presence
        .engines()
        .iter()
        .map(|engine| TargetStatus {
            name: engine.name().to_string(),
            target: engine.target().to_string(),
            present: engine.is_present(),
            last_probe_at: engine.last_probe_at(),
            last_webhook_at: engine.last_webhook_at(),
            pending_webhook: queue.pending_state(engine.target()),
        })
        .collect();

    let aggregator = presence.aggregator();
    let anyone = aggregator.anyone_present();
    let sensors = aggregator.sensors();
    let aggregates = AggregatesStatus {
        anyone: sensors.anyone.as_ref().map(|name| AggregateStatus {
            name: name.clone(),
            present: anyone,
        }),
        no_one: sensors.no_one.as_ref().map(|name| AggregateStatus {
            name: name.clone(),
            present: !anyone,
        }),
    };

    Json(SensorsResponse {
        targets,
        aggregates,
    })
}

// ============================================================================
// API: History
// ============================================================================

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let Some(engine) = state.presence.find(&name) else {
        return (StatusCode::NOT_FOUND, "Sensor not found").into_response();
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    match state.store.get_history(engine.name(), limit) {
        Ok(entries) => Json::<Vec<HistoryEntry>>(entries).into_response(),
        Err(e) => {
            tracing::error!("Failed to read history for {}: {}", engine.name(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
