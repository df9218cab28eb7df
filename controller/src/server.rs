use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use thermostat_common::{
    now_ms, protocol::accept_setpoint_request, AuthenticatedEnvelope, Authenticator, Endpoint,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    registry::{drive_after_jitter, SharedRegistry},
    store::ConfigStore,
};

#[derive(Clone)]
pub struct AppState {
    registry: SharedRegistry,
    auth: Arc<Authenticator>,
    store: ConfigStore,
    actuator_jitter: Duration,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppState {
    pub fn new(
        registry: SharedRegistry,
        auth: Authenticator,
        store: ConfigStore,
        actuator_jitter: Duration,
    ) -> Self {
        Self {
            registry,
            auth: Arc::new(auth),
            store,
            actuator_jitter,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/data.json", get(handle_get_data).post(handle_post_data))
        .route("/config.json", get(handle_get_config).post(handle_post_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_get_data(State(state): State<AppState>) -> Response {
    respond(&state, Endpoint::Data).await
}

async fn handle_get_config(State(state): State<AppState>) -> Response {
    respond(&state, Endpoint::Config).await
}

// Bodies are taken raw: a request that fails to parse still gets the signed state back.
async fn handle_post_data(State(state): State<AppState>, body: Bytes) -> Response {
    apply_setpoint_request(&state, &body).await;
    respond(&state, Endpoint::Data).await
}

async fn handle_post_config(State(state): State<AppState>, body: Bytes) -> Response {
    apply_setpoint_request(&state, &body).await;
    respond(&state, Endpoint::Config).await
}

/// Authenticates and applies one setpoint change. Rejections are logged, never answered.
async fn apply_setpoint_request(state: &AppState, body: &[u8]) {
    let envelope = match AuthenticatedEnvelope::from_slice(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("ignoring setpoint request: {err}");
            return;
        }
    };
    let change = match accept_setpoint_request(&state.auth, &envelope, now_ms()) {
        Ok(change) => change,
        Err(err) => {
            warn!("rejected setpoint request: {err}");
            return;
        }
    };

    // The file writer is taken before the registry is released so concurrent
    // requests persist in the order their snapshots were taken.
    let (wanted, config, writer) = {
        let mut registry = state.registry.lock().await;
        let Some(wanted) = registry.set_setpoint(&change.name, change.setpoint) else {
            warn!("setpoint request for unknown thermostat {}", change.name);
            return;
        };
        let config = registry.configuration().clone();
        (wanted, config, state.store.writer().await)
    };
    info!("setpoint of {} set to {}", change.name, change.setpoint);

    if wanted.is_some() {
        tokio::spawn(drive_after_jitter(
            state.registry.clone(),
            change.name.clone(),
            state.actuator_jitter,
        ));
    }
    if let Err(err) = writer.write(&config).await {
        warn!("failed to persist setpoint of {}: {err:#}", change.name);
    }
}

async fn respond(state: &AppState, endpoint: Endpoint) -> Response {
    let payload = {
        let registry = state.registry.lock().await;
        match endpoint {
            Endpoint::Data => serde_json::to_value(registry.data()),
            Endpoint::Config => serde_json::to_value(registry.configuration().public_view()),
        }
    };

    match payload.and_then(|payload: Value| state.auth.seal(&payload)) {
        Ok(envelope) => Json(envelope).into_response(),
        Err(err) => {
            warn!("failed to seal {endpoint}: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode state")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
