//! The asset cache controller: install, fetch, and activate handlers.
//!
//! Each handler corresponds to one lifecycle event delivered by the worker
//! host. Install pre-caches the manifest all-or-nothing, fetch serves
//! cache-first with network fall-through, and activate purges every store
//! generation other than the current one.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CachedAsset, ServeSource, ServedResponse};

use super::net::NetworkFetch;

/// Identity of one generation of cached assets.
///
/// The version suffix is the sole invalidation lever: bumping it on redeploy
/// forces a full manifest re-fetch and purges the old store on activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheIdentity {
  name: String,
  version: String,
}

impl CacheIdentity {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
    }
  }

  /// Store name for this generation, e.g. `mills-shirley-v1.0.0`.
  pub fn store_name(&self) -> String {
    format!("{}-v{}", self.name, self.version)
  }
}

impl std::fmt::Display for CacheIdentity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.store_name())
  }
}

/// Cache controller bound to one identity and one manifest.
///
/// Storage and network are injected so tests can run against in-memory fakes.
pub struct CacheController<S, N> {
  storage: Arc<S>,
  network: N,
  identity: CacheIdentity,
  manifest: Vec<Url>,
}

impl<S: CacheStorage, N: NetworkFetch> CacheController<S, N> {
  pub fn new(storage: Arc<S>, network: N, identity: CacheIdentity, manifest: Vec<Url>) -> Self {
    Self {
      storage,
      network,
      identity,
      manifest,
    }
  }

  pub fn identity(&self) -> &CacheIdentity {
    &self.identity
  }

  /// Names of store generations currently held by the backend.
  pub fn existing_stores(&self) -> Result<Vec<String>> {
    self.storage.store_names()
  }

  /// Install handler: pre-cache every manifest entry into the current store.
  ///
  /// All-or-nothing: every fetch must succeed with a 2xx status before
  /// anything is written, and the batch write itself is atomic. On any
  /// failure the current generation's store is never created, so a previous
  /// generation (if present) is left fully intact.
  pub async fn on_install(&self) -> Result<usize> {
    let store = self.identity.store_name();
    debug!("installing cache store {}", store);

    let fetches = self.manifest.iter().map(|url| self.fetch_for_install(url));
    let assets = try_join_all(fetches).await?;

    self.storage.open_store(&store)?;
    self.storage.put_all(&store, &assets)?;

    info!("installed cache store {} ({} assets)", store, assets.len());
    Ok(assets.len())
  }

  async fn fetch_for_install(&self, url: &Url) -> Result<CachedAsset> {
    let asset = self.network.fetch(url).await?;
    if !asset.is_success() {
      return Err(eyre!(
        "Pre-cache fetch for {} returned status {}",
        url,
        asset.status
      ));
    }
    Ok(asset)
  }

  /// Fetch handler: serve from the current store, else pass through to the
  /// network. Cache hits are returned unconditionally, with no freshness
  /// check; misses return the network's response or error unmodified.
  pub async fn on_fetch(&self, request: &Url) -> Result<ServedResponse> {
    self.serve_from(&self.identity.store_name(), request).await
  }

  /// Serve a request from an explicit store generation. The host uses this
  /// when an older generation remains authoritative after a failed install.
  pub async fn serve_from(&self, store: &str, request: &Url) -> Result<ServedResponse> {
    if let Some(asset) = self.storage.get(store, request.as_str())? {
      debug!("cache hit for {}", request);
      return Ok(ServedResponse {
        asset,
        source: ServeSource::Cache,
      });
    }

    debug!("cache miss for {}, passing through to network", request);
    let asset = self.network.fetch(request).await?;
    Ok(ServedResponse {
      asset,
      source: ServeSource::Network,
    })
  }

  /// Activate handler: delete every store whose name differs from the
  /// current identity. This is the only eviction mechanism. Per-store
  /// deletion failures are logged and skipped; they never block activation.
  pub async fn on_activate(&self) -> Result<Vec<String>> {
    let current = self.identity.store_name();
    let mut deleted = Vec::new();

    for name in self.storage.store_names()? {
      if name == current {
        continue;
      }
      match self.storage.delete_store(&name) {
        Ok(_) => {
          info!("deleted old cache store {}", name);
          deleted.push(name);
        }
        Err(e) => {
          warn!("failed to delete old cache store {}: {}", name, e);
        }
      }
    }

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use async_trait::async_trait;
  use chrono::Utc;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// In-memory network: serves registered bodies with 200, anything else
  /// with 404, and errors outright when switched offline. Clones share state
  /// so tests can flip switches on the copy they kept.
  #[derive(Clone)]
  struct FakeNetwork {
    inner: Arc<FakeNetworkInner>,
  }

  struct FakeNetworkInner {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
  }

  impl FakeNetwork {
    fn new() -> Self {
      Self {
        inner: Arc::new(FakeNetworkInner {
          responses: Mutex::new(HashMap::new()),
          offline: AtomicBool::new(false),
          fetches: AtomicUsize::new(0),
        }),
      }
    }

    fn serve(&self, url: &str, body: &[u8]) {
      self
        .inner
        .responses
        .lock()
        .unwrap()
        .insert(url.to_string(), body.to_vec());
    }

    fn unserve(&self, url: &str) {
      self.inner.responses.lock().unwrap().remove(url);
    }

    fn set_offline(&self, offline: bool) {
      self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn fetch_count(&self) -> usize {
      self.inner.fetches.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl NetworkFetch for FakeNetwork {
    async fn fetch(&self, url: &Url) -> Result<CachedAsset> {
      self.inner.fetches.fetch_add(1, Ordering::SeqCst);

      if self.inner.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable: {}", url));
      }

      let responses = self.inner.responses.lock().unwrap();
      let (status, body) = match responses.get(url.as_str()) {
        Some(body) => (200, body.clone()),
        None => (404, b"not found".to_vec()),
      };

      Ok(CachedAsset {
        url: url.as_str().to_string(),
        status,
        content_type: Some("text/plain".to_string()),
        body,
        fetched_at: Utc::now(),
      })
    }
  }

  const MANIFEST: &[&str] = &["/", "/styles.css", "/scripts.js"];

  fn manifest_urls() -> Vec<Url> {
    MANIFEST
      .iter()
      .map(|p| Url::parse("https://example.com").unwrap().join(p).unwrap())
      .collect()
  }

  fn populated_network() -> FakeNetwork {
    let network = FakeNetwork::new();
    for url in manifest_urls() {
      network.serve(url.as_str(), format!("body of {}", url).as_bytes());
    }
    network
  }

  fn controller(
    storage: &Arc<MemoryStorage>,
    network: &FakeNetwork,
    version: &str,
  ) -> CacheController<MemoryStorage, FakeNetwork> {
    CacheController::new(
      Arc::clone(storage),
      network.clone(),
      CacheIdentity::new("site", version),
      manifest_urls(),
    )
  }

  #[tokio::test]
  async fn install_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();
    let controller = controller(&storage, &network, "1.0.0");

    controller.on_install().await.unwrap();
    controller.on_install().await.unwrap();

    assert_eq!(
      storage.entry_count("site-v1.0.0").unwrap(),
      Some(MANIFEST.len())
    );
  }

  #[tokio::test]
  async fn cache_first_serves_installed_assets_offline() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();
    let controller = controller(&storage, &network, "1.0.0");

    controller.on_install().await.unwrap();
    network.set_offline(true);

    let request = Url::parse("https://example.com/styles.css").unwrap();
    let served = controller.on_fetch(&request).await.unwrap();

    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.asset.body, b"body of https://example.com/styles.css");
  }

  #[tokio::test]
  async fn cache_hit_ignores_newer_network_content() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();
    let controller = controller(&storage, &network, "1.0.0");

    controller.on_install().await.unwrap();
    // The network now has different content; the cache must still win
    network.serve("https://example.com/styles.css", b"redeployed");

    let request = Url::parse("https://example.com/styles.css").unwrap();
    let served = controller.on_fetch(&request).await.unwrap();

    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.asset.body, b"body of https://example.com/styles.css");
  }

  #[tokio::test]
  async fn uncached_request_falls_through_to_network() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();
    network.serve("https://example.com/api/news", b"latest news");
    let controller = controller(&storage, &network, "1.0.0");

    controller.on_install().await.unwrap();

    let request = Url::parse("https://example.com/api/news").unwrap();
    let served = controller.on_fetch(&request).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.asset.body, b"latest news");

    // Network error statuses pass through unmodified too
    let missing = Url::parse("https://example.com/nope").unwrap();
    let served = controller.on_fetch(&missing).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.asset.status, 404);
  }

  #[tokio::test]
  async fn uncached_request_surfaces_network_error() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();
    let controller = controller(&storage, &network, "1.0.0");

    controller.on_install().await.unwrap();
    network.set_offline(true);

    let request = Url::parse("https://example.com/api/news").unwrap();
    assert!(controller.on_fetch(&request).await.is_err());
  }

  #[tokio::test]
  async fn activation_leaves_exactly_one_store() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();

    controller(&storage, &network, "1.0.0")
      .on_install()
      .await
      .unwrap();
    let v2 = controller(&storage, &network, "2.0.0");
    v2.on_install().await.unwrap();
    assert_eq!(storage.store_names().unwrap().len(), 2);

    let deleted = v2.on_activate().await.unwrap();

    assert_eq!(deleted, vec!["site-v1.0.0".to_string()]);
    assert_eq!(storage.store_names().unwrap(), vec!["site-v2.0.0".to_string()]);
  }

  #[tokio::test]
  async fn failed_install_creates_no_store_and_keeps_previous() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();

    controller(&storage, &network, "1.0.0")
      .on_install()
      .await
      .unwrap();

    // One manifest entry now 404s: the v1.0.1 install must fail closed
    network.unserve("https://example.com/scripts.js");
    let result = controller(&storage, &network, "1.0.1").on_install().await;

    assert!(result.is_err());
    assert_eq!(storage.store_names().unwrap(), vec!["site-v1.0.0".to_string()]);
    assert_eq!(
      storage.entry_count("site-v1.0.0").unwrap(),
      Some(MANIFEST.len())
    );
  }

  #[tokio::test]
  async fn version_bump_refetches_and_purges_old_store() {
    let storage = Arc::new(MemoryStorage::new());
    let network = populated_network();

    controller(&storage, &network, "1.0.0")
      .on_install()
      .await
      .unwrap();
    let fetched_during_v1 = network.fetch_count();

    let v101 = controller(&storage, &network, "1.0.1");
    v101.on_install().await.unwrap();
    v101.on_activate().await.unwrap();

    // Every manifest entry was fetched again for the new generation
    assert_eq!(network.fetch_count(), fetched_during_v1 + MANIFEST.len());
    assert_eq!(storage.store_names().unwrap(), vec!["site-v1.0.1".to_string()]);
    assert_eq!(
      storage.entry_count("site-v1.0.1").unwrap(),
      Some(MANIFEST.len())
    );
  }

  /// Storage whose deletes always fail, for exercising activation cleanup.
  struct StuckStorage {
    inner: MemoryStorage,
  }

  impl CacheStorage for StuckStorage {
    fn open_store(&self, name: &str) -> Result<()> {
      self.inner.open_store(name)
    }
    fn put_all(&self, name: &str, assets: &[CachedAsset]) -> Result<()> {
      self.inner.put_all(name, assets)
    }
    fn get(&self, name: &str, url: &str) -> Result<Option<CachedAsset>> {
      self.inner.get(name, url)
    }
    fn entry_count(&self, name: &str) -> Result<Option<usize>> {
      self.inner.entry_count(name)
    }
    fn store_names(&self) -> Result<Vec<String>> {
      self.inner.store_names()
    }
    fn delete_store(&self, _name: &str) -> Result<bool> {
      Err(eyre!("store is busy"))
    }
  }

  #[tokio::test]
  async fn activation_cleanup_failure_is_non_fatal() {
    let storage = Arc::new(StuckStorage {
      inner: MemoryStorage::new(),
    });
    storage.open_store("site-v0.9.0").unwrap();
    let network = populated_network();

    let controller = CacheController::new(
      Arc::clone(&storage),
      network.clone(),
      CacheIdentity::new("site", "1.0.0"),
      manifest_urls(),
    );
    controller.on_install().await.unwrap();

    // Deletion fails, but activation itself still succeeds
    let deleted = controller.on_activate().await.unwrap();
    assert!(deleted.is_empty());
  }
}
