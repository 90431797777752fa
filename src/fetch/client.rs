use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::TryStreamExt;
use std::time::Duration;

use crate::config::NetworkConfig;

use super::types::{Body, Request, Response};

/// Anything able to perform a live fetch.
///
/// An `Err` means no response could be obtained at all (unreachable host,
/// timeout, broken connection). Error statuses are still `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network fetcher backed by reqwest
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")));
    if let Some(secs) = config.timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method(), e))?;

    let mut builder = self.client.request(method, request.url().clone());
    for (name, value) in request.headers() {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body() {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url(), e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let stream = response
      .bytes_stream()
      .map_err(|e| eyre!("Failed to read response body: {}", e));

    Ok(Response::new(status, headers, Body::from_stream(stream)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::types::Method;
  use url::Url;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_streams_body_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/index.html"))
      .respond_with(ResponseTemplate::new(200).set_body_string("<html>shell</html>"))
      .mount(&server)
      .await;

    let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse(&format!("{}/index.html", server.uri())).unwrap();
    let response = fetcher.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_fetch_forwards_method_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/documents"))
      .and(header("x-client", "shellcache"))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;

    let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse(&format!("{}/v1/documents", server.uri())).unwrap();
    let request = Request::new(Method::Post, url)
      .with_header("x-client", "shellcache")
      .with_body("{\"id\":1}");

    let response = fetcher.fetch(&request).await.unwrap();
    assert_eq!(response.status(), 201);
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
    let response = fetcher.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status(), 404);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_an_error() {
    let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
    // Port 9 (discard) is not expected to be listening on loopback.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();

    assert!(fetcher.fetch(&Request::get(url)).await.is_err());
  }
}
