use crate::adapters::{AdapterResponse, CallContext};
use crate::dispatch::Relay;
use crate::error::{RelayError, Result};
use crate::logging::SharedLogger;
use crate::translate::canonical::{ErrorBody, ErrorDetail};
use crate::translate::media::{FormRequest, UploadFile};

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub relay: Relay,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/chat/completions", post(handle_chat))
        .route("/v1/completions", post(handle_completions))
        .route("/v1/responses", post(handle_responses))
        .route("/v1/embeddings", post(handle_embeddings))
        .route("/v1/rerank", post(handle_rerank))
        .route("/v1/images/generations", post(handle_image_generation))
        .route("/v1/images/edits", post(handle_image_edit))
        .route("/v1/images/variations", post(handle_image_variation))
        .route("/v1/audio/speech", post(handle_speech))
        .route("/v1/audio/transcriptions", post(handle_transcription))
        .route("/v1/audio/translations", post(handle_translation))
        .route("/v1/video/submit", post(handle_video_submit))
        .route("/v1/video/status", post(handle_video_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The canonical error body for a failure that happened before any output.
fn error_response(err: &RelayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = ErrorBody {
        error: ErrorDetail {
            message: err.to_string(),
            error_type: err.kind().to_string(),
            code: status.as_u16(),
        },
    };
    (status, Json(body)).into_response()
}

fn parse<T: DeserializeOwned>(state: &AppState, body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        state
            .logger
            .warn("server", format!("Failed to parse request: {}", e));
        RelayError::invalid_request(format!("Invalid request body: {}", e))
    })
}

/// A fresh call context whose token fires once the response body is dropped.
fn call_context() -> (CallContext, tokio_util::sync::DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (CallContext::new(cancel), guard)
}

/// Stream an adapter response to the client. The drop guard travels with the
/// body, so a client disconnect cancels upstream work.
fn stream_response(resp: AdapterResponse, guard: tokio_util::sync::DropGuard) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = resp.body.map(move |chunk| {
        let _held = &guard;
        chunk
    });
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    response.headers_mut().extend(resp.headers);
    response
}

fn respond(result: Result<AdapterResponse>, guard: tokio_util::sync::DropGuard) -> Response {
    match result {
        Ok(resp) => stream_response(resp, guard),
        Err(e) => error_response(&e),
    }
}

async fn read_form(mut multipart: Multipart) -> Result<FormRequest> {
    let bad = |e: axum::extract::multipart::MultipartError| {
        RelayError::invalid_request(format!("Invalid multipart body: {}", e))
    };
    let mut form = FormRequest::default();
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad)?;
                form.files.push(UploadFile {
                    field: name,
                    filename,
                    content_type,
                    bytes,
                });
            }
            None => {
                let value = field.text().await.map_err(bad)?;
                form.fields.push((name, value));
            }
        }
    }
    Ok(form)
}

macro_rules! json_handler {
    ($name:ident, $req:ty, $method:ident) => {
        async fn $name(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
            let req: $req = match parse(&state, &body) {
                Ok(r) => r,
                Err(e) => return error_response(&e),
            };
            let (cx, guard) = call_context();
            respond(state.relay.$method(req, &cx).await, guard)
        }
    };
}

macro_rules! form_handler {
    ($name:ident, $method:ident) => {
        async fn $name(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
            let req = match read_form(multipart).await {
                Ok(r) => r,
                Err(e) => return error_response(&e),
            };
            let (cx, guard) = call_context();
            respond(state.relay.$method(req, &cx).await, guard)
        }
    };
}

json_handler!(handle_completions, crate::translate::media::CompletionRequest, completions);
json_handler!(handle_responses, crate::translate::media::ResponsesRequest, responses);
json_handler!(handle_embeddings, crate::translate::media::EmbeddingRequest, embeddings);
json_handler!(handle_rerank, crate::translate::media::RerankRequest, rerank);
json_handler!(handle_image_generation, crate::translate::media::ImageRequest, create_image);
json_handler!(handle_speech, crate::translate::media::SpeechRequest, speech);
form_handler!(handle_image_edit, edit_image);
form_handler!(handle_image_variation, image_variation);
form_handler!(handle_transcription, transcription);
form_handler!(handle_translation, translation);

async fn handle_chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: crate::translate::canonical::ChatCompletionRequest = match parse(&state, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    state.logger.debug(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model,
            req.is_stream(),
            req.messages.len()
        ),
    );

    let (cx, guard) = call_context();
    respond(state.relay.chat_completions(req, &cx).await, guard)
}

async fn handle_video_submit(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: crate::translate::media::VideoSubmitRequest = match parse(&state, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    let (cx, _guard) = call_context();
    match state.relay.video_submit(req, &cx).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_video_status(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: crate::translate::media::VideoStatusRequest = match parse(&state, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    let (cx, _guard) = call_context();
    match state.relay.video_status(req, &cx).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Response {
    let (cx, _guard) = call_context();
    match state.relay.models(&cx).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.relay.preset().name,
        "jobs": state.relay.tracker().len(),
    }))
}
