//! Mapping requests to caching strategies.

use serde::Deserialize;
use std::fmt;
use url::Url;

/// The five request strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  CacheOnly,
  NetworkOnly,
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::CacheFirst => "cache-first",
      Self::NetworkFirst => "network-first",
      Self::StaleWhileRevalidate => "stale-while-revalidate",
      Self::CacheOnly => "cache-only",
      Self::NetworkOnly => "network-only",
    };
    f.write_str(name)
  }
}

/// A URL fragment bound to a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrategyRule {
  pub pattern: String,
  pub strategy: Strategy,
}

impl StrategyRule {
  pub fn new(pattern: &str, strategy: Strategy) -> Self {
    Self {
      pattern: pattern.to_string(),
      strategy,
    }
  }

  fn matches(&self, url: &Url) -> bool {
    url.path().contains(&self.pattern) || url.as_str().contains(&self.pattern)
  }
}

/// Picks exactly one strategy per request.
///
/// Precedence: explicit rules (first match wins), then identity providers
/// (always network-first), then static-asset extensions (cache-first), then
/// network-first.
#[derive(Debug, Clone)]
pub struct StrategySelector {
  rules: Vec<StrategyRule>,
  identity_providers: Vec<String>,
  static_extensions: Vec<String>,
}

impl StrategySelector {
  pub fn new(
    rules: Vec<StrategyRule>,
    identity_providers: Vec<String>,
    static_extensions: Vec<String>,
  ) -> Self {
    Self {
      rules,
      identity_providers,
      static_extensions: static_extensions
        .into_iter()
        .map(|e| e.to_ascii_lowercase())
        .collect(),
    }
  }

  pub fn select(&self, url: &Url) -> Strategy {
    if let Some(rule) = self.rules.iter().find(|r| r.matches(url)) {
      return rule.strategy;
    }

    if self.is_identity_provider(url) {
      return Strategy::NetworkFirst;
    }

    if self.is_static_asset(url) {
      return Strategy::CacheFirst;
    }

    Strategy::NetworkFirst
  }

  fn is_identity_provider(&self, url: &Url) -> bool {
    let host = url.host_str().unwrap_or("");
    self
      .identity_providers
      .iter()
      .any(|p| host == p || host.ends_with(&format!(".{}", p)) || url.as_str().contains(p.as_str()))
  }

  fn is_static_asset(&self, url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    self.static_extensions.iter().any(|ext| path.ends_with(ext))
  }
}

/// Rules applied when the configuration does not name its own.
pub fn default_rules() -> Vec<StrategyRule> {
  vec![
    StrategyRule::new("/api/", Strategy::NetworkFirst),
    StrategyRule::new("firebaseio.com", Strategy::NetworkFirst),
    StrategyRule::new("supabase.co", Strategy::NetworkFirst),
    StrategyRule::new("/offline.html", Strategy::CacheOnly),
    StrategyRule::new("/sw-version", Strategy::NetworkOnly),
    StrategyRule::new("fonts.googleapis.com", Strategy::StaleWhileRevalidate),
    StrategyRule::new("fonts.gstatic.com", Strategy::CacheFirst),
    StrategyRule::new("cdn.jsdelivr.net", Strategy::StaleWhileRevalidate),
    StrategyRule::new("cdnjs.cloudflare.com", Strategy::StaleWhileRevalidate),
  ]
}

pub fn default_identity_providers() -> Vec<String> {
  [
    "identitytoolkit.googleapis.com",
    "securetoken.googleapis.com",
    "accounts.google.com",
    "apis.google.com",
    "/auth/v1/",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

pub fn default_static_extensions() -> Vec<String> {
  [
    ".js", ".mjs", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".woff",
    ".woff2", ".ttf",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}
