//! The pre-cache manifest: an ordered, deploy-time-fixed list of resource
//! paths that must be available offline.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Ordered list of resource paths to pre-cache.
///
/// Paths are site-relative (e.g. `/assets/css/styles.css`) and resolved
/// against the configured origin. Duplicates are rejected up front so a store
/// populated from a manifest always holds exactly one entry per path.
#[derive(Debug, Clone)]
pub struct Manifest {
  paths: Vec<String>,
}

impl Manifest {
  /// Build a manifest from raw paths, rejecting empty and duplicate entries.
  pub fn from_paths(paths: Vec<String>) -> Result<Self> {
    if paths.is_empty() {
      return Err(eyre!("Manifest is empty: nothing to pre-cache"));
    }

    let mut seen = std::collections::HashSet::new();
    for path in &paths {
      if path.trim().is_empty() {
        return Err(eyre!("Manifest contains an empty path"));
      }
      if !seen.insert(path.as_str()) {
        return Err(eyre!("Manifest contains duplicate path: {}", path));
      }
    }

    Ok(Self { paths })
  }

  /// Resolve every path against the origin, preserving manifest order.
  pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>> {
    self
      .paths
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid manifest path {}: {}", path, e))
      })
      .collect()
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://example.com").unwrap()
  }

  #[test]
  fn resolves_paths_in_order() {
    let manifest = Manifest::from_paths(vec![
      "/".to_string(),
      "/assets/css/styles.css".to_string(),
      "/assets/favicon/favicon.png".to_string(),
    ])
    .unwrap();

    let urls = manifest.resolve(&origin()).unwrap();
    let urls: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
    assert_eq!(
      urls,
      vec![
        "https://example.com/",
        "https://example.com/assets/css/styles.css",
        "https://example.com/assets/favicon/favicon.png",
      ]
    );
  }

  #[test]
  fn resolves_paths_with_spaces() {
    let manifest =
      Manifest::from_paths(vec!["/assets/fonts/Equity Text A Regular.ttf".to_string()]).unwrap();

    let urls = manifest.resolve(&origin()).unwrap();
    // Url::join percent-encodes the spaces
    assert_eq!(
      urls[0].as_str(),
      "https://example.com/assets/fonts/Equity%20Text%20A%20Regular.ttf"
    );
  }

  #[test]
  fn rejects_empty_manifest() {
    assert!(Manifest::from_paths(vec![]).is_err());
  }

  #[test]
  fn rejects_blank_path() {
    assert!(Manifest::from_paths(vec!["/".to_string(), "  ".to_string()]).is_err());
  }

  #[test]
  fn rejects_duplicate_paths() {
    let result = Manifest::from_paths(vec!["/index.html".to_string(), "/index.html".to_string()]);
    assert!(result.is_err());
  }
}
