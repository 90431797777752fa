//! Cache layer that runs the fetch/cache strategies against a partition store.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::fetch::{Destination, Fetcher, Request, Response};

use super::classify::PartitionRole;
use super::registry::VersionRegistry;
use super::storage::PartitionStore;
use super::types::{CacheResult, StoredResponse, Unavailable};

/// Cache layer that manages caching logic and network fetching.
///
/// Both strategies are total: the caller gets a response or an
/// [`Unavailable`], never a storage or transport error. Storage failures are
/// logged and degrade to a miss (on read) or a skipped store (on write).
pub struct CacheLayer<S: PartitionStore> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  registry: VersionRegistry,
  /// Cache key of the shell document served to failed navigations
  shell_key: String,
}

impl<S: PartitionStore> CacheLayer<S> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    registry: VersionRegistry,
    shell_key: impl Into<String>,
  ) -> Self {
    Self {
      storage,
      fetcher,
      registry,
      shell_key: shell_key.into(),
    }
  }

  pub fn partition_name(&self, role: PartitionRole) -> &str {
    match role {
      PartitionRole::Static => self.registry.static_partition(),
      PartitionRole::Dynamic => self.registry.dynamic_partition(),
    }
  }

  /// Network-first, for live-service calls.
  ///
  /// 1. Fetch from network; a 200 is stored in the dynamic partition
  /// 2. On network failure, serve the dynamic partition's copy (offline mode)
  /// 3. Nothing stored either: unavailable
  ///
  /// Non-GET requests never read from or write to any partition.
  pub async fn network_first(&self, request: &Request) -> Result<CacheResult<Response>, Unavailable> {
    if !request.method().is_read() {
      return self.passthrough(request).await;
    }

    let partition = self.registry.dynamic_partition();
    match self.fetch_and_store(request, partition).await {
      Ok(response) => Ok(CacheResult::from_network(response)),
      Err(err) => {
        debug!(url = %request.url(), error = %err, "Network failed, trying {}", partition);
        match self.lookup(partition, request.cache_key()) {
          Some(stored) => {
            let cached_at = stored.stored_at;
            Ok(CacheResult::offline(stored.into_response(), cached_at))
          }
          None => Err(Unavailable::new(
            request,
            format!("network failed and nothing is stored: {}", err),
          )),
        }
      }
    }
  }

  /// Cache-first, for static and dynamic assets.
  ///
  /// 1. Check every partition (hinted one first) - on hit, return immediately
  /// 2. On miss, fetch from network; a 200 is stored in the hinted partition
  /// 3. On network failure, navigations get the shell document; anything else
  ///    is unavailable
  pub async fn cache_first(
    &self,
    request: &Request,
    role: PartitionRole,
  ) -> Result<CacheResult<Response>, Unavailable> {
    let partition = self.partition_name(role);

    if let Some((found_in, stored)) = self.find(request.cache_key(), partition) {
      debug!(url = %request.url(), partition = %found_in, "Cache hit");
      let cached_at = stored.stored_at;
      return Ok(CacheResult::from_cache(stored.into_response(), cached_at));
    }

    match self.fetch_and_store(request, partition).await {
      Ok(response) => Ok(CacheResult::from_network(response)),
      Err(err) => {
        if request.destination() == Destination::Document {
          if let Some(shell) = self.lookup(self.registry.static_partition(), &self.shell_key) {
            debug!(url = %request.url(), error = %err, "Navigation failed, serving shell");
            let cached_at = shell.stored_at;
            return Ok(CacheResult::shell(shell.into_response(), cached_at));
          }
        }
        Err(Unavailable::new(request, err.to_string()))
      }
    }
  }

  /// Forward to the network without touching any partition.
  pub async fn passthrough(&self, request: &Request) -> Result<CacheResult<Response>, Unavailable> {
    self
      .fetcher
      .fetch(request)
      .await
      .map(CacheResult::passthrough)
      .map_err(|e| Unavailable::new(request, e.to_string()))
  }

  /// Live fetch; a 200 is duplicated, one copy stored and the other returned.
  /// Other statuses are returned untouched and never stored.
  async fn fetch_and_store(&self, request: &Request, partition: &str) -> Result<Response> {
    let response = self.fetcher.fetch(request).await?;
    if !response.is_ok() {
      return Ok(response);
    }

    let (response, copy) = response.duplicate().await?;
    match StoredResponse::capture(copy).await {
      Ok(stored) => {
        if let Err(e) = self.storage.put(partition, request.cache_key(), &stored) {
          warn!(url = %request.url(), partition, error = %e, "Failed to store response");
        }
      }
      Err(e) => warn!(url = %request.url(), error = %e, "Failed to capture response"),
    }

    Ok(response)
  }

  fn lookup(&self, partition: &str, key: &str) -> Option<StoredResponse> {
    self.storage.get(partition, key).unwrap_or_else(|e| {
      warn!(key, partition, error = %e, "Cache lookup failed");
      None
    })
  }

  fn find(&self, key: &str, preferred: &str) -> Option<(String, StoredResponse)> {
    self.storage.find(key, preferred).unwrap_or_else(|e| {
      warn!(key, error = %e, "Cache lookup failed");
      None
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStore;
  use crate::cache::types::CacheSource;
  use crate::fetch::Method;
  use crate::testing::{stored, FakeNetwork};
  use url::Url;

  const SHELL: &str = "https://app.example.com/index.html";

  fn setup(network: &Arc<FakeNetwork>) -> (Arc<SqliteStore>, CacheLayer<SqliteStore>) {
    let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
    let layer = CacheLayer::new(
      Arc::clone(&storage),
      network.clone(),
      VersionRegistry::new("app", "v2"),
      SHELL,
    );
    (storage, layer)
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  async fn body(result: CacheResult<Response>) -> String {
    String::from_utf8(result.data.bytes().await.unwrap().to_vec()).unwrap()
  }

  #[tokio::test]
  async fn test_cache_hit_skips_network() {
    let network = Arc::new(FakeNetwork::new().route("https://app.example.com/app.js", 200, "fresh"));
    let (storage, layer) = setup(&network);
    storage.put("app-static-v2", "https://app.example.com/app.js", &stored("cached")).unwrap();

    let result = layer
      .cache_first(&get("https://app.example.com/app.js"), PartitionRole::Static)
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(body(result).await, "cached");
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_hit_from_another_partition() {
    let network = Arc::new(FakeNetwork::new());
    let (storage, layer) = setup(&network);
    storage.put("app-dynamic-v1", "https://app.example.com/logo.png", &stored("old")).unwrap();

    let result = layer
      .cache_first(&get("https://app.example.com/logo.png"), PartitionRole::Dynamic)
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(body(result).await, "old");
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_miss_fetches_and_stores_in_hinted_partition() {
    let network = Arc::new(FakeNetwork::new().route("https://app.example.com/page", 200, "page"));
    let (storage, layer) = setup(&network);

    let result = layer
      .cache_first(&get("https://app.example.com/page"), PartitionRole::Dynamic)
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(body(result).await, "page");
    let saved = storage.get("app-dynamic-v2", "https://app.example.com/page").unwrap().unwrap();
    assert_eq!(&saved.body[..], b"page");
    assert_eq!(storage.get("app-static-v2", "https://app.example.com/page").unwrap(), None);
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_stored() {
    let network = Arc::new(FakeNetwork::new().route("https://app.example.com/gone", 404, "nope"));
    let (storage, layer) = setup(&network);

    let result = layer
      .cache_first(&get("https://app.example.com/gone"), PartitionRole::Dynamic)
      .await
      .unwrap();

    assert_eq!(result.data.status(), 404);
    assert!(storage.partitions().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_navigation_serves_shell() {
    let network = Arc::new(FakeNetwork::new().offline());
    let (storage, layer) = setup(&network);
    storage.put("app-static-v2", SHELL, &stored("<shell>")).unwrap();

    let request = get("https://app.example.com/reports/42").with_destination(Destination::Document);
    let result = layer.cache_first(&request, PartitionRole::Dynamic).await.unwrap();

    assert_eq!(result.source, CacheSource::Shell);
    assert_eq!(body(result).await, "<shell>");
  }

  #[tokio::test]
  async fn test_failed_subresource_is_unavailable() {
    let network = Arc::new(FakeNetwork::new().offline());
    let (storage, layer) = setup(&network);
    storage.put("app-static-v2", SHELL, &stored("<shell>")).unwrap();

    let request = get("https://app.example.com/chart.png").with_destination(Destination::Image);
    let err = layer.cache_first(&request, PartitionRole::Dynamic).await.unwrap_err();

    assert_eq!(err.url.as_str(), "https://app.example.com/chart.png");
  }

  #[tokio::test]
  async fn test_failed_navigation_without_shell_is_unavailable() {
    let network = Arc::new(FakeNetwork::new().offline());
    let (_storage, layer) = setup(&network);

    let request = get("https://app.example.com/").with_destination(Destination::Document);
    assert!(layer.cache_first(&request, PartitionRole::Static).await.is_err());
  }

  #[tokio::test]
  async fn test_network_first_prefers_live_and_updates_dynamic() {
    let url = "https://firestore.googleapis.com/v1/lines";
    let network = Arc::new(FakeNetwork::new().route(url, 200, "live"));
    let (storage, layer) = setup(&network);
    storage.put("app-dynamic-v2", url, &stored("stale")).unwrap();

    let result = layer.network_first(&get(url)).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(body(result).await, "live");
    let saved = storage.get("app-dynamic-v2", url).unwrap().unwrap();
    assert_eq!(&saved.body[..], b"live");
  }

  #[tokio::test]
  async fn test_network_first_falls_back_when_offline() {
    let url = "https://firestore.googleapis.com/v1/lines";
    let network = Arc::new(FakeNetwork::new().offline());
    let (storage, layer) = setup(&network);
    storage.put("app-dynamic-v2", url, &stored("last seen")).unwrap();

    let result = layer.network_first(&get(url)).await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert!(result.cached_at.is_some());
    assert_eq!(body(result).await, "last seen");
  }

  #[tokio::test]
  async fn test_network_first_offline_without_copy_is_unavailable() {
    let network = Arc::new(FakeNetwork::new().offline());
    let (_storage, layer) = setup(&network);

    let err = layer
      .network_first(&get("https://firestore.googleapis.com/v1/lines"))
      .await
      .unwrap_err();

    assert_eq!(err.method, Method::Get);
  }

  #[tokio::test]
  async fn test_network_first_only_reads_dynamic_partition() {
    let url = "https://firestore.googleapis.com/v1/lines";
    let network = Arc::new(FakeNetwork::new().offline());
    let (storage, layer) = setup(&network);
    storage.put("app-dynamic-v1", url, &stored("previous version")).unwrap();

    assert!(layer.network_first(&get(url)).await.is_err());
  }

  #[tokio::test]
  async fn test_network_first_mutation_never_touches_partitions() {
    let url = "https://firestore.googleapis.com/v1/lines";
    let network = Arc::new(FakeNetwork::new().route(url, 200, "created"));
    let (storage, layer) = setup(&network);

    let request = Request::new(Method::Post, Url::parse(url).unwrap()).with_body("{}");
    let result = layer.network_first(&request).await.unwrap();
    assert_eq!(result.source, CacheSource::Passthrough);
    assert!(storage.partitions().unwrap().is_empty());

    // Offline with a stored GET copy: the mutation still fails
    storage.put("app-dynamic-v2", url, &stored("get copy")).unwrap();
    network.set_offline(true);
    assert!(layer.network_first(&request).await.is_err());
  }
}
