//! HTTP front of the worker.
//!
//! Pages point at the proxy instead of the application origin. Requests
//! under `/__sw/` are control traffic for the worker itself; everything else
//! is an intercepted fetch.

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
  body::{to_bytes, Body},
  extract::{Request as AxumRequest, State},
  http::{HeaderValue, StatusCode, Uri},
  response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse, Response as AxumResponse,
  },
  routing::{get, post},
  Json, Router,
};
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

use crate::http::{Request, Response};
use crate::worker::{ServiceWorker, WorkerMessage};

/// Largest request body the proxy will buffer.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
  pub worker: Arc<ServiceWorker>,
}

#[derive(Debug, Deserialize)]
struct SyncEvent {
  tag: String,
}

pub fn router(worker: Arc<ServiceWorker>) -> Router {
  Router::new()
    .route("/__sw/message", post(post_message))
    .route("/__sw/sync", post(post_sync))
    .route("/__sw/clients", get(client_events))
    .fallback(proxy)
    .with_state(AppState { worker })
}

/// Serve until ctrl-c, then retire the worker.
pub async fn serve(listener: TcpListener, worker: Arc<ServiceWorker>) -> Result<()> {
  let addr = listener
    .local_addr()
    .map_err(|e| eyre!("Failed to read listener address: {}", e))?;
  info!(%addr, origin = %worker.config().origin, "proxy listening");

  axum::serve(listener, router(Arc::clone(&worker)).into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  worker.retire()
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for shutdown signal");
  }
}

async fn post_message(
  State(state): State<AppState>,
  Json(message): Json<WorkerMessage>,
) -> AxumResponse {
  match state.worker.handle_message(&message) {
    Ok(Some(reply)) => Json(reply).into_response(),
    Ok(None) => StatusCode::ACCEPTED.into_response(),
    Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  }
}

async fn post_sync(State(state): State<AppState>, Json(event): Json<SyncEvent>) -> AxumResponse {
  match state.worker.handle_sync(&event.tag) {
    Ok(notified) => Json(serde_json::json!({ "notified": notified })).into_response(),
    Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
  }
}

/// One event stream per open page; messages the worker posts arrive as JSON
/// `data:` lines.
async fn client_events(State(state): State<AppState>) -> AxumResponse {
  let mut handle = match state.worker.connect_client() {
    Ok(handle) => handle,
    Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
  };
  if let Ok((open, controlled)) = state.worker.client_counts() {
    debug!(client = handle.id, open, controlled, "page connected");
  }

  let events = stream! {
    while let Some(message) = handle.recv().await {
      match Event::default().json_data(&message) {
        Ok(event) => yield Ok::<Event, Infallible>(event),
        Err(e) => warn!(error = %e, "failed to encode client message"),
      }
    }
  };

  Sse::new(events)
    .keep_alive(KeepAlive::default())
    .into_response()
}

async fn proxy(State(state): State<AppState>, request: AxumRequest) -> AxumResponse {
  let request = match to_worker_request(&state.worker.config().origin, request).await {
    Ok(request) => request,
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };

  let result = state.worker.handle_fetch(request).await;
  debug!(
    source = ?result.source,
    cached_at = ?result.cached_at,
    status = result.response.status,
    "served"
  );
  build_response(result.response)
}

/// Resolve a request target to the URL the worker fetches.
///
/// Origin-form targets (`/path?query`) always address the application
/// origin, even when the path starts with `//`. Absolute-form targets name
/// their own host; that is how cross-origin fetches reach the proxy.
fn target_url(origin: &Url, uri: &Uri) -> Result<Url> {
  if uri.authority().is_none() {
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    return Ok(url);
  }

  let url =
    Url::parse(&uri.to_string()).map_err(|e| eyre!("Invalid request target '{}': {}", uri, e))?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(eyre!("Unsupported request target '{}'", uri));
  }
  Ok(url)
}

async fn to_worker_request(origin: &Url, request: AxumRequest) -> Result<Request> {
  let (parts, body) = request.into_parts();

  let url = target_url(origin, &parts.uri)?;

  let headers = parts
    .headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body: Bytes = to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| eyre!("Failed to read request body: {}", e))?;

  Ok(Request {
    method: parts.method.as_str().to_string(),
    url,
    headers,
    body,
  })
}

fn build_response(response: Response) -> AxumResponse {
  let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
  let mut builder = AxumResponse::builder().status(status);

  for (name, value) in response.headers {
    if let Ok(header_value) = HeaderValue::from_str(&value) {
      builder = builder.header(name, header_value);
    }
  }

  builder
    .body(Body::from(response.body))
    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
