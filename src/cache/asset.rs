//! Core types for cached asset snapshots.

use chrono::{DateTime, Utc};

/// A stored response snapshot for a single asset URL.
///
/// Snapshots are written as a batch at install time and returned verbatim on
/// every cache hit afterwards. There is no per-entry update path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
  /// Absolute URL the response was fetched from
  pub url: String,
  /// HTTP status code
  pub status: u16,
  /// Content-Type header value, if the response carried one
  pub content_type: Option<String>,
  /// Response body bytes
  pub body: Vec<u8>,
  /// When the response was fetched
  pub fetched_at: DateTime<Utc>,
}

impl CachedAsset {
  /// Whether the status is in the 2xx range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// A response produced by the fetch handler, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct ServedResponse {
  pub asset: CachedAsset,
  pub source: ServeSource,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Hit in the active cache store
  Cache,
  /// Passed through to the network
  Network,
}

impl std::fmt::Display for ServeSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ServeSource::Cache => write!(f, "cache"),
      ServeSource::Network => write!(f, "network"),
    }
  }
}
