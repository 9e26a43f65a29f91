use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub site: SiteConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  /// Origin the worker serves, e.g. "https://example.com"
  pub origin: String,
  /// Page served from cache when a static asset is unreachable offline
  #[serde(default = "default_fallback_page")]
  pub fallback_page: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Generation identifier naming the current set of stores
  pub generation: String,
  /// Assets fetched and stored at install time (paths or absolute URLs)
  #[serde(default)]
  pub precache: Vec<String>,
  /// Third-party hosts served stale-while-revalidate (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_set")]
  pub external_origins: BTreeSet<String>,
  /// Same-origin path prefixes treated as data endpoints
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
}

fn default_fallback_page() -> String {
  "/offline.html".to_string()
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string(), "/data/".to_string()]
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  /// 4. ~/.config/offcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The site origin as a parsed base URL.
  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.site.origin)
      .map_err(|e| eyre!("Invalid site origin {}: {}", self.site.origin, e))
  }

  /// Resolve a precache entry or page path to an absolute URL.
  ///
  /// Entries that already parse as absolute URLs are taken as-is; anything
  /// else is joined onto the site origin.
  pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(path_or_url) {
      return Ok(url);
    }

    self
      .base_url()?
      .join(path_or_url)
      .map_err(|e| eyre!("Cannot resolve {} against {}: {}", path_or_url, self.site.origin, e))
  }
}
