//! Remote transport: the collaborator that actually reads data.
//!
//! The sync coordinator wraps a transport but never replaces it; timeouts and
//! retries are the transport's business.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::{Entity, TransportError};

/// What to read from the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
  pub resource: Option<String>,
  /// Location relative to the transport base; falls back to the resource.
  pub url: Option<String>,
  pub identity: Option<Value>,
}

impl RemoteRequest {
  pub fn for_entity<E: Entity + ?Sized>(entity: &E) -> Self {
    Self {
      resource: entity.resource(),
      url: entity.url(),
      identity: entity.identity(),
    }
  }

  /// Path to request, if one can be derived.
  pub fn path(&self) -> Option<&str> {
    self.url.as_deref().or(self.resource.as_deref())
  }
}

/// A successful remote read: the JSON body plus response metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteResponse {
  pub payload: Value,
  /// Header names are stored lowercase.
  headers: HashMap<String, String>,
}

impl RemoteResponse {
  pub fn new(payload: Value) -> Self {
    Self {
      payload,
      headers: HashMap::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }
}

/// Trait for remote data sources.
pub trait RemoteTransport: Send + Sync {
  fn read(
    &self,
    request: &RemoteRequest,
  ) -> impl Future<Output = Result<RemoteResponse, TransportError>> + Send;
}

/// Transport for cache-only use when no remote is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

impl RemoteTransport for Offline {
  async fn read(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
    Err(TransportError::Request(format!(
      "no remote configured for {}",
      request.path().unwrap_or("<unresolved>")
    )))
  }
}

/// HTTP transport reading JSON with GET requests.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Result<Self> {
    // Url::join drops the last segment of a base without a trailing slash
    let base = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url = Url::parse(&base).map_err(|e| eyre!("Invalid base URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  fn endpoint(&self, request: &RemoteRequest) -> Result<Url, TransportError> {
    let path = request
      .path()
      .ok_or_else(|| TransportError::Request("no url or resource to request".to_string()))?;
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::Request(format!("invalid path {}: {}", path, e)))
  }
}

impl RemoteTransport for HttpTransport {
  async fn read(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
    let url = self.endpoint(request)?;
    debug!(url = %url, "remote read");

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| TransportError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      return Err(TransportError::Status {
        status: status.as_u16(),
        url: url.to_string(),
      });
    }

    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
      .collect();

    let payload: Value = response
      .json()
      .await
      .map_err(|e| TransportError::Decode(e.to_string()))?;

    Ok(
      headers
        .into_iter()
        .fold(RemoteResponse::new(payload), |resp, (name, value)| {
          resp.with_header(&name, value)
        }),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = RemoteResponse::new(Value::Null).with_header("Cache-Control", "max-age=60");
    assert_eq!(response.header("cache-control"), Some("max-age=60"));
    assert_eq!(response.header("CACHE-CONTROL"), Some("max-age=60"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_endpoint_joins_base() {
    let transport = HttpTransport::new("https://api.example.com/v1").unwrap();
    let request = RemoteRequest {
      resource: Some("todos".to_string()),
      url: None,
      identity: None,
    };
    assert_eq!(
      transport.endpoint(&request).unwrap().as_str(),
      "https://api.example.com/v1/todos"
    );

    let request = RemoteRequest {
      url: Some("/todos/5".to_string()),
      ..request
    };
    assert_eq!(
      transport.endpoint(&request).unwrap().as_str(),
      "https://api.example.com/v1/todos/5"
    );
  }

  #[tokio::test]
  async fn test_offline_never_answers() {
    let request = RemoteRequest {
      resource: Some("todos".to_string()),
      url: None,
      identity: None,
    };
    assert_eq!(
      Offline.read(&request).await,
      Err(TransportError::Request("no remote configured for todos".to_string()))
    );
  }

  #[test]
  fn test_endpoint_requires_path() {
    let transport = HttpTransport::new("https://api.example.com/").unwrap();
    let request = RemoteRequest {
      resource: None,
      url: None,
      identity: None,
    };
    assert!(matches!(
      transport.endpoint(&request),
      Err(TransportError::Request(_))
    ));
  }
}
