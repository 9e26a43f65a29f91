//! Request classification and strategy selection.

use color_eyre::Result;
use std::collections::BTreeSet;
use url::Url;

use crate::cache::FetchRequest;
use crate::config::Config;

/// Extensions treated as static assets on the site origin.
const STATIC_EXTENSIONS: &[&str] = &[
  "css", "js", "mjs", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2",
];

/// Same-origin directories that hold static assets regardless of extension.
const ASSET_DIRS: &[&str] = &["/assets/", "/static/"];

/// What a request classified as, which picks its strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Same-origin static asset: cache-first
  StaticAsset,
  /// Allow-listed third-party host: stale-while-revalidate
  External,
  /// Data endpoint: network-first
  Api,
  /// Everything else, including navigations: network-first
  Dynamic,
  /// Not intercepted at all (non-GET or non-http scheme)
  Passthrough,
}

/// Classifies requests against the configured site.
///
/// Precedence is first-match-wins: static asset, then external host, then
/// data endpoint, then dynamic. Static matching only ever applies to
/// same-origin URLs, so a CDN-hosted stylesheet still resolves to the
/// external allow-list rather than cache-first.
pub struct Classifier {
  base: Url,
  precache_paths: BTreeSet<String>,
  external_origins: BTreeSet<String>,
  api_prefixes: Vec<String>,
}

impl Classifier {
  pub fn from_config(config: &Config) -> Result<Self> {
    let base = config.base_url()?;

    // Same-origin precache entries match exactly by path; cross-origin
    // entries are still precached but classify by host at fetch time.
    let mut precache_paths = BTreeSet::new();
    for entry in &config.cache.precache {
      let url = config.resolve(entry)?;
      if url.origin() == base.origin() {
        precache_paths.insert(url.path().to_string());
      }
    }

    Ok(Self {
      base,
      precache_paths,
      external_origins: config.cache.external_origins.clone(),
      api_prefixes: config.cache.api_prefixes.clone(),
    })
  }

  pub fn classify(&self, request: &FetchRequest) -> RequestClass {
    if !request.is_get() {
      return RequestClass::Passthrough;
    }
    if !matches!(request.url.scheme(), "http" | "https") {
      return RequestClass::Passthrough;
    }

    if self.is_static_asset(&request.url) {
      return RequestClass::StaticAsset;
    }

    if let Some(host) = request.url.host_str() {
      if self.external_origins.contains(&host.to_lowercase()) {
        return RequestClass::External;
      }
    }

    if self.is_data_endpoint(&request.url) {
      return RequestClass::Api;
    }

    RequestClass::Dynamic
  }

  fn is_static_asset(&self, url: &Url) -> bool {
    if url.origin() != self.base.origin() {
      return false;
    }

    let path = url.path();
    if self.precache_paths.contains(path) {
      return true;
    }
    if ASSET_DIRS.iter().any(|dir| path.starts_with(dir)) {
      return true;
    }

    match path.rsplit_once('.') {
      Some((_, ext)) => STATIC_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
      None => false,
    }
  }

  fn is_data_endpoint(&self, url: &Url) -> bool {
    let path = url.path();
    self.api_prefixes.iter().any(|prefix| path.starts_with(prefix))
      || path.to_lowercase().ends_with(".json")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    let config: Config = serde_yaml::from_str(
      r#"
site:
  origin: https://example.com
cache:
  generation: v1
  precache:
    - /
    - /index.html
    - /offline.html
  external_origins:
    - fonts.googleapis.com
"#,
    )
    .unwrap();
    Classifier::from_config(&config).unwrap()
  }

  fn get(url: &str) -> FetchRequest {
    FetchRequest::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_precache_entry_is_static() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://example.com/index.html")), RequestClass::StaticAsset);
    assert_eq!(c.classify(&get("https://example.com/")), RequestClass::StaticAsset);
  }

  #[test]
  fn test_extension_and_asset_dir_are_static() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://example.com/theme.js")), RequestClass::StaticAsset);
    assert_eq!(
      c.classify(&get("https://example.com/assets/hero.avif")),
      RequestClass::StaticAsset
    );
  }

  #[test]
  fn test_external_host_wins_over_extension() {
    let c = classifier();
    // A CDN stylesheet is external, never cache-first
    assert_eq!(
      c.classify(&get("https://fonts.googleapis.com/css2?family=Inter")),
      RequestClass::External
    );
  }

  #[test]
  fn test_unlisted_cross_origin_is_dynamic() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://other.example.net/lib.js")), RequestClass::Dynamic);
  }

  #[test]
  fn test_data_endpoints() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://example.com/api/contact")), RequestClass::Api);
    assert_eq!(c.classify(&get("https://example.com/data/projects")), RequestClass::Api);
    assert_eq!(c.classify(&get("https://example.com/projects.json")), RequestClass::Api);
  }

  #[test]
  fn test_navigation_is_dynamic() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://example.com/about")), RequestClass::Dynamic);
  }

  #[test]
  fn test_non_get_and_non_http_pass_through() {
    let c = classifier();

    let mut post = get("https://example.com/api/contact");
    post.method = "POST".to_string();
    assert_eq!(c.classify(&post), RequestClass::Passthrough);

    assert_eq!(c.classify(&get("ftp://example.com/file")), RequestClass::Passthrough);
  }
}
