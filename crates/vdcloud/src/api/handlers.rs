//! HTTP request handlers.

use axum::{
    Json,
    extract::{Path, Query, RawQuery, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::attach::{AttachChannel, ClientSocket};
use crate::container::ContainerId;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Sessions currently registered.
    pub sessions: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions.live_count(),
    })
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

/// Create a sandbox with the configured resource profile.
pub async fn create_container(State(state): State<AppState>) -> ApiResult<Json<CreateResponse>> {
    let id = state.sessions.create(&state.profile).await?;
    Ok(Json(CreateResponse { id: id.to_string() }))
}

/// Start a sandbox.
pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state.sessions.start(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Raw resize parameters; validated by hand so errors keep the JSON shape.
#[derive(Debug, Deserialize)]
pub struct ResizeQuery {
    pub h: Option<String>,
    pub w: Option<String>,
}

/// Resize a sandbox terminal to `h` rows by `w` columns.
pub async fn resize_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResizeQuery>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let rows = parse_dimension("h", query.h.as_deref())?;
    let cols = parse_dimension("w", query.w.as_deref())?;
    state.sessions.resize(&id, rows, cols).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Attach to a sandbox terminal.
///
/// The upgrade is only accepted once the runtime attach socket is open. If it
/// cannot be opened the request is answered with a bare 502.
pub async fn attach_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let session = state.sessions.attachable(&id)?;

    let mut channel = AttachChannel::new(session);
    let runtime = match state.proxy.connect(&mut channel, query.as_deref()).await {
        Ok(runtime) => runtime,
        Err(_) => return Ok(StatusCode::BAD_GATEWAY.into_response()),
    };

    let proxy = state.proxy.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        proxy.run(channel, ClientSocket::new(socket), runtime).await;
    }))
}

/// Identifiers outside the grammar are answered like unknown ones.
fn parse_id(raw: &str) -> ApiResult<ContainerId> {
    ContainerId::parse(raw).map_err(|_| ApiError::not_found(format!("No such container: {raw}")))
}

fn parse_dimension(name: &str, value: Option<&str>) -> ApiResult<u32> {
    let value = value.ok_or_else(|| ApiError::bad_request(format!("missing query parameter {name}")))?;
    value
        .parse::<u32>()
        .ok()
        .filter(|v| (1..=u32::from(u16::MAX)).contains(v))
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "query parameter {name} must be an integer between 1 and {}, got {value:?}",
                u16::MAX
            ))
        })
}
