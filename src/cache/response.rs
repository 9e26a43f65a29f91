//! Request and response value model for the cache stores.

use serde::{Deserialize, Serialize};
use url::{Position, Url};

/// Status code for synthesized offline responses.
pub const OFFLINE_STATUS: u16 = 503;

const OFFLINE_BODY: &str = "<!doctype html><html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available without a network connection.</p></body></html>";

/// A request observed by the worker.
///
/// Requests are identified in the stores by method plus URL; fragments are
/// not part of the identity.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Whether this is a page navigation (top-level document load)
  pub is_navigation: bool,
}

impl FetchRequest {
  /// Create a plain GET request.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
      body: None,
      is_navigation: false,
    }
  }

  /// Create a GET request marked as a page navigation.
  pub fn navigation(url: Url) -> Self {
    Self {
      is_navigation: true,
      ..Self::get(url)
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Store key identifying this request: `"<METHOD> <url-without-fragment>"`.
  pub fn store_key(&self) -> String {
    format!(
      "{} {}",
      self.method.to_uppercase(),
      &self.url[..Position::AfterQuery]
    )
  }
}

/// A full response as persisted in a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Look up a header value by case-insensitive name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// The synthesized response served when nothing else is available offline.
  pub fn offline() -> Self {
    Self {
      status: OFFLINE_STATUS,
      headers: vec![("content-type".to_string(), "text/html; charset=utf-8".to_string())],
      body: OFFLINE_BODY.as_bytes().to_vec(),
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Live network response
  Network,
  /// Previously stored copy
  Cache,
  /// Offline fallback (cached fallback page or synthesized response)
  Fallback,
}

/// A response paired with its provenance.
#[derive(Debug, Clone)]
pub struct ServeResult {
  pub response: StoredResponse,
  pub served_from: ServedFrom,
}

impl ServeResult {
  pub fn from_network(response: StoredResponse) -> Self {
    Self {
      response,
      served_from: ServedFrom::Network,
    }
  }

  pub fn from_cache(response: StoredResponse) -> Self {
    Self {
      response,
      served_from: ServedFrom::Cache,
    }
  }

  pub fn fallback(response: StoredResponse) -> Self {
    Self {
      response,
      served_from: ServedFrom::Fallback,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(url: &str) -> Url {
    Url::parse(url).unwrap()
  }

  #[test]
  fn test_store_key_ignores_fragment() {
    let a = FetchRequest::get(parse("https://example.com/page#top"));
    let b = FetchRequest::get(parse("https://example.com/page"));
    assert_eq!(a.store_key(), b.store_key());
  }

  #[test]
  fn test_store_key_keeps_query() {
    let a = FetchRequest::get(parse("https://example.com/page?v=1"));
    let b = FetchRequest::get(parse("https://example.com/page?v=2"));
    assert_ne!(a.store_key(), b.store_key());
  }

  #[test]
  fn test_store_key_uppercases_method() {
    let mut req = FetchRequest::get(parse("https://example.com/"));
    req.method = "get".to_string();
    assert!(req.store_key().starts_with("GET "));
  }

  #[test]
  fn test_is_success_bounds() {
    assert!(StoredResponse::new(200, vec![], vec![]).is_success());
    assert!(StoredResponse::new(299, vec![], vec![]).is_success());
    assert!(!StoredResponse::new(304, vec![], vec![]).is_success());
    assert!(!StoredResponse::new(404, vec![], vec![]).is_success());
  }

  #[test]
  fn test_header_lookup_case_insensitive() {
    let resp = StoredResponse::new(
      200,
      vec![("Content-Type".to_string(), "text/css".to_string())],
      vec![],
    );
    assert_eq!(resp.header("content-type"), Some("text/css"));
    assert_eq!(resp.header("x-missing"), None);
  }

  #[test]
  fn test_offline_response_shape() {
    let resp = StoredResponse::offline();
    assert_eq!(resp.status, OFFLINE_STATUS);
    assert!(resp.header("content-type").unwrap().starts_with("text/html"));
    assert!(!resp.body.is_empty());
  }
}
