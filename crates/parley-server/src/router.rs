use axum::{
    Json, Router,
    extract::{Query, Request, State, WebSocketUpgrade},
    http::{HeaderMap, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug, debug_span};

use parley_gateway::GatewayState;
use parley_gateway::auth::{authenticate_with_timeout, bearer_token};
use parley_gateway::connection;
use parley_types::api::HealthResponse;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span with the path only. The query string can carry a live token.
fn request_span(request: &Request) -> Span {
    debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Token comes from `?token=` first, then `Authorization: Bearer`. The socket
/// is upgraded either way so a refused client still gets a reason and a close
/// code instead of a bare HTTP error.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
    });

    let auth = authenticate_with_timeout(&state, token.as_deref()).await;

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(user) => connection::handle_connection_authenticated(socket, state, user).await,
            Err(e) => {
                debug!("Gateway handshake refused: {}", e);
                connection::reject_connection(socket, e).await
            }
        }
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}
