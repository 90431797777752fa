//! Outgoing requests, responses, and the live network behind them.

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{Destination, Headers, Method, Request, Response};
#[cfg(test)]
pub use types::Body;
