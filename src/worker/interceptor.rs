use tracing::trace;

use crate::cache::{CacheLayer, CacheResult, Classification, Classifier, PartitionStore, Strategy, Unavailable};
use crate::fetch::{Request, Response};

/// Entry point for every outgoing request.
///
/// Decides only cache-vs-network flow; the request itself is handed on
/// unmodified.
pub struct Interceptor<S: PartitionStore> {
  classifier: Classifier,
  layer: CacheLayer<S>,
}

impl<S: PartitionStore> Interceptor<S> {
  pub fn new(classifier: Classifier, layer: CacheLayer<S>) -> Self {
    Self { classifier, layer }
  }

  pub async fn handle(&self, request: &Request) -> Result<CacheResult<Response>, Unavailable> {
    match self.classifier.classify(request) {
      None => {
        trace!(method = %request.method(), url = %request.url(), "Not intercepted");
        self.layer.passthrough(request).await
      }
      Some(Classification {
        strategy: Strategy::NetworkFirst,
        ..
      }) => self.layer.network_first(request).await,
      Some(Classification {
        strategy: Strategy::CacheFirst,
        partition,
      }) => self.layer.cache_first(request, partition).await,
    }
  }
}
