//! Durable entries for the pending-submission queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::cache::FetchRequest;

/// Store holding failed submissions awaiting replay. Survives generation
/// cleanup and CLEAR_CACHE is the only thing that removes it wholesale.
pub const PENDING_STORE: &str = "pending-submissions";

/// Sync tag that triggers submission replay.
pub const SUBMISSION_SYNC_TAG: &str = "replay-submissions";

/// A previously-failed outbound request persisted for later replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSubmission {
  pub method: String,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub queued_at: DateTime<Utc>,
}

impl QueuedSubmission {
  pub fn from_request(request: &FetchRequest) -> Self {
    Self {
      method: request.method.to_uppercase(),
      url: request.url.to_string(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      queued_at: Utc::now(),
    }
  }

  /// Content-addressed entry id: identical submissions collapse onto one
  /// queue entry no matter how often they fail.
  pub fn id(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b"\n");
    hasher.update(self.url.as_bytes());
    hasher.update(b"\n");
    if let Some(body) = &self.body {
      hasher.update(body);
    }
    hex::encode(hasher.finalize())
  }

  /// Rebuild the request for a resend attempt.
  pub fn to_request(&self) -> Result<FetchRequest> {
    let url = Url::parse(&self.url).map_err(|e| eyre!("Invalid queued URL {}: {}", self.url, e))?;

    Ok(FetchRequest {
      method: self.method.clone(),
      url,
      headers: self.headers.clone(),
      body: self.body.clone(),
      is_navigation: false,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn submission(url: &str, body: &[u8]) -> QueuedSubmission {
    let mut request = FetchRequest::get(Url::parse(url).unwrap());
    request.method = "POST".to_string();
    request.body = Some(body.to_vec());
    QueuedSubmission::from_request(&request)
  }

  #[test]
  fn test_id_is_stable_across_requeues() {
    let a = submission("https://example.com/api/contact", b"hello");
    let b = submission("https://example.com/api/contact", b"hello");
    // queued_at differs, identity does not
    assert_eq!(a.id(), b.id());
  }

  #[test]
  fn test_id_differs_on_body_and_url() {
    let a = submission("https://example.com/api/contact", b"hello");
    let b = submission("https://example.com/api/contact", b"other");
    let c = submission("https://example.com/api/signup", b"hello");
    assert_ne!(a.id(), b.id());
    assert_ne!(a.id(), c.id());
  }

  #[test]
  fn test_to_request_roundtrip() {
    let entry = submission("https://example.com/api/contact", b"hello");
    let request = entry.to_request().unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.url.as_str(), "https://example.com/api/contact");
    assert_eq!(request.body.as_deref(), Some(b"hello".as_slice()));
  }

  #[test]
  fn test_to_request_rejects_malformed_url() {
    let mut entry = submission("https://example.com/api/contact", b"x");
    entry.url = "not a url".to_string();
    assert!(entry.to_request().is_err());
  }
}
