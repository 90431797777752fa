//! Request and response values passed between the interceptor and the network.

use bytes::{Bytes, BytesMut};
use color_eyre::Result;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Header list, kept in the order received.
pub type Headers = Vec<(String, String)>;

/// HTTP method of an outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  /// Only GET responses are ever cached or looked up.
  pub fn is_read(self) -> bool {
    matches!(self, Method::Get)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(format!("unsupported method: {}", other)),
    }
  }
}

/// What the requesting context intends to do with the response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Destination {
  /// Top-level page navigation
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  /// Programmatic calls (fetch/XHR)
  #[default]
  Empty,
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "document" => Ok(Destination::Document),
      "script" => Ok(Destination::Script),
      "style" => Ok(Destination::Style),
      "image" => Ok(Destination::Image),
      "font" => Ok(Destination::Font),
      "manifest" => Ok(Destination::Manifest),
      "" | "empty" => Ok(Destination::Empty),
      other => Err(format!("unknown destination: {}", other)),
    }
  }
}

/// An outgoing request. Never mutated once built.
#[derive(Debug, Clone)]
pub struct Request {
  url: Url,
  method: Method,
  destination: Destination,
  headers: Headers,
  body: Option<Bytes>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      url,
      method,
      destination: Destination::Empty,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn method(&self) -> Method {
    self.method
  }

  pub fn destination(&self) -> Destination {
    self.destination
  }

  pub fn headers(&self) -> &[(String, String)] {
    &self.headers
  }

  pub fn body(&self) -> Option<&Bytes> {
    self.body.as_ref()
  }

  /// Key used for partition lookups and stores.
  pub fn cache_key(&self) -> &str {
    self.url.as_str()
  }
}

/// Response payload. Reading it consumes it.
pub enum Body {
  Full(Bytes),
  Stream(BoxStream<'static, Result<Bytes>>),
}

impl Body {
  pub fn from_stream<S>(stream: S) -> Self
  where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
  {
    Body::Stream(stream.boxed())
  }

  /// Drain the body into a single buffer.
  pub async fn bytes(self) -> Result<Bytes> {
    match self {
      Body::Full(bytes) => Ok(bytes),
      Body::Stream(stream) => {
        let buf = stream
          .try_fold(BytesMut::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
          })
          .await?;
        Ok(buf.freeze())
      }
    }
  }
}

impl From<Bytes> for Body {
  fn from(bytes: Bytes) -> Self {
    Body::Full(bytes)
  }
}

impl fmt::Debug for Body {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
      Body::Stream(_) => f.write_str("Stream"),
    }
  }
}

/// A response as received from the network or rebuilt from storage.
#[derive(Debug)]
pub struct Response {
  status: u16,
  headers: Headers,
  body: Body,
}

impl Response {
  pub fn new(status: u16, headers: Headers, body: impl Into<Body>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  pub fn headers(&self) -> &[(String, String)] {
    &self.headers
  }

  /// Only a plain 200 is eligible for storage.
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  pub fn into_parts(self) -> (u16, Headers, Body) {
    (self.status, self.headers, self.body)
  }

  pub async fn bytes(self) -> Result<Bytes> {
    self.body.bytes().await
  }

  /// Consume this response and produce two independently readable copies.
  ///
  /// The body is read exactly once; both copies carry the buffered payload, so
  /// one can be stored while the other is handed back to the caller.
  pub async fn duplicate(self) -> Result<(Response, Response)> {
    let body = self.body.bytes().await?;
    let copy = Response {
      status: self.status,
      headers: self.headers.clone(),
      body: Body::Full(body.clone()),
    };
    let original = Response {
      status: self.status,
      headers: self.headers,
      body: Body::Full(body),
    };
    Ok((original, copy))
  }
}
