//! In-memory transport for tests.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::TransportError;
use crate::transport::{RemoteRequest, RemoteResponse, RemoteTransport};

/// Transport answering from a fixed route table, optionally after a delay.
#[derive(Default)]
pub struct MockTransport {
  routes: HashMap<String, Result<RemoteResponse, TransportError>>,
  delays: HashMap<String, Duration>,
  calls: AtomicUsize,
  completed: AtomicUsize,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_response(self, path: &str, payload: Value) -> Self {
    self.with_response_headers(path, payload, &[])
  }

  pub fn with_response_headers(mut self, path: &str, payload: Value, headers: &[(&str, &str)]) -> Self {
    let response = headers
      .iter()
      .fold(RemoteResponse::new(payload), |resp, (name, value)| {
        resp.with_header(name, *value)
      });
    self.routes.insert(path.to_string(), Ok(response));
    self
  }

  pub fn with_error(mut self, path: &str, error: TransportError) -> Self {
    self.routes.insert(path.to_string(), Err(error));
    self
  }

  pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
    self.delays.insert(path.to_string(), delay);
    self
  }

  /// Reads started.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Reads that ran to completion.
  pub fn completed(&self) -> usize {
    self.completed.load(Ordering::SeqCst)
  }
}

impl RemoteTransport for MockTransport {
  async fn read(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let path = request.path().unwrap_or_default().to_string();

    if let Some(delay) = self.delays.get(&path) {
      tokio::time::sleep(*delay).await;
    }

    let result = self
      .routes
      .get(&path)
      .cloned()
      .unwrap_or_else(|| Err(TransportError::Request(format!("no route for {}", path))));
    self.completed.fetch_add(1, Ordering::SeqCst);
    result
  }
}
