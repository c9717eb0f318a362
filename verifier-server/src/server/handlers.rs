use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use oid4vp_verifier::verifier::{error::VerifierError, response::CallbackPayload};
use oid4vp_verifier_frontend::{CallbackAck, CreateRequest, CreateResponse, SessionView};
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use super::AppState;

type AppResult<T> = Result<Json<T>, AppError>;

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    request: Result<Json<CreateRequest>, JsonRejection>,
) -> AppResult<CreateResponse> {
    let Json(request) = request.map_err(|e| AppError::bad_request(e.body_text()))?;
    let created = state.verifier.create(request).await?;
    Ok(Json(created.into()))
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<CallbackAck> {
    let id = parse_id(&request_id)?;
    // Unknown ids are reported as such, whatever the body.
    state.verifier.session(id).await?;

    let content_type = headers.get(CONTENT_TYPE).and_then(|ct| ct.to_str().ok());
    let payload = CallbackPayload::from_body(content_type, &body)
        .map_err(|e| AppError::bad_request(format!("{e:#}")))?;

    Ok(Json(state.verifier.handle_callback(id, payload).await?))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> AppResult<SessionView> {
    let id = parse_id(&request_id)?;
    Ok(Json(state.verifier.status(id).await?))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "time": now() }))
}

pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    let service = &state.service;
    Json(json!({
        "service": service.name,
        "version": service.version,
        "callbackBase": service.callback_base,
        "requestMode": service.request_mode,
        "time": now(),
    }))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An id that does not parse cannot name a session.
fn parse_id(request_id: &str) -> Result<Uuid, AppError> {
    request_id.parse().map_err(|_| {
        debug!("unparseable request id '{request_id}'");
        AppError {
            status: StatusCode::NOT_FOUND,
            message: format!("presentation request {request_id} not found"),
        }
    })
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<VerifierError> for AppError {
    fn from(err: VerifierError) -> Self {
        let status = err.status_code();
        if status.is_server_error() {
            error!("{err:#}");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
