//! Synthesized responses for when neither cache nor network can answer.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::http::{Request, Response, ResponseType};

const OFFLINE_MESSAGE: &str = "You are offline. Changes will sync once the connection is restored.";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>BIAPO - Offline</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 0; min-height: 100vh;
           display: flex; align-items: center; justify-content: center;
           background: #f4f6f8; color: #22303c; }
    main { max-width: 28rem; padding: 2rem; text-align: center; }
    h1 { font-size: 1.5rem; margin-bottom: .5rem; }
    button { margin-top: 1.5rem; padding: .6rem 1.4rem; border: 0; border-radius: .4rem;
             background: #2a6fdb; color: #fff; font-size: 1rem; cursor: pointer; }
  </style>
</head>
<body>
  <main>
    <h1>You are offline</h1>
    <p>BIAPO cannot reach the server right now. Your tasks and events will be
       available again as soon as the connection is back.</p>
    <button onclick="location.reload()">Try again</button>
  </main>
</body>
</html>
"#;

#[derive(Serialize)]
struct OfflineBody<'a> {
  error: &'a str,
  message: &'a str,
  timestamp: String,
}

/// Kind of resource a request is after, as far as fallbacks care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
  Document,
  Json,
  Other,
}

fn destination(request: &Request) -> Destination {
  let path = request.path();
  let accept = request.header("accept").unwrap_or("");

  if path.ends_with(".json") || accept.contains("application/json") {
    Destination::Json
  } else if accept.contains("text/html") || path.ends_with('/') || path.ends_with(".html") {
    Destination::Document
  } else {
    Destination::Other
  }
}

/// Substitute response for `request` after both cache and network failed.
pub fn offline_response(request: &Request) -> Response {
  match destination(request) {
    Destination::Document => Response::new(200, ResponseType::Default)
      .with_header("content-type", "text/html; charset=utf-8")
      .with_body(OFFLINE_PAGE),
    Destination::Json => {
      let body = OfflineBody {
        error: "Offline",
        message: OFFLINE_MESSAGE,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      };
      // Serializing a struct of strings cannot fail
      let json = serde_json::to_vec(&body).unwrap_or_default();
      Response::new(200, ResponseType::Default)
        .with_header("content-type", "application/json")
        .with_body(json)
    }
    Destination::Other => service_unavailable(),
  }
}

/// Bare 503 with no body.
pub fn service_unavailable() -> Response {
  Response::new(503, ResponseType::Default)
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse(&format!("http://app.test{}", path)).unwrap())
  }

  #[test]
  fn test_json_fallback_body() {
    let response = offline_response(&request("/report.json"));
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "Offline");
    assert!(body["message"].is_string());
    let timestamp = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
  }

  #[test]
  fn test_json_fallback_from_accept_header() {
    let req = request("/api/tasks").with_header("Accept", "application/json");
    let response = offline_response(&req);
    assert_eq!(response.header("content-type"), Some("application/json"));
  }

  #[test]
  fn test_html_fallback_for_documents() {
    for req in [
      request("/"),
      request("/index.html"),
      request("/calendar").with_header("Accept", "text/html,application/xhtml+xml"),
    ] {
      let response = offline_response(&req);
      assert_eq!(response.status, 200);
      assert_eq!(
        response.header("content-type"),
        Some("text/html; charset=utf-8")
      );
      assert!(std::str::from_utf8(&response.body)
        .unwrap()
        .contains("You are offline"));
    }
  }

  #[test]
  fn test_other_requests_get_bare_503() {
    let response = offline_response(&request("/images/logo.png"));
    assert_eq!(response.status, 503);
    assert!(response.body.is_empty());
    assert!(response.headers.is_empty());
  }

  #[test]
  fn test_fallbacks_are_never_cacheable() {
    assert!(!offline_response(&request("/")).is_cacheable());
    assert!(!offline_response(&request("/a.json")).is_cacheable());
  }
}
