//! Cache policy resolution.
//!
//! Every read resolves one `CachePolicy` from four ordered sources: the
//! per-call options, the entity itself, the owning collection and finally the
//! application defaults. The first source that states a value wins.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use super::traits::{CacheSettings, FetchOptions};

/// Default expiration for cached data, in minutes.
pub const DEFAULT_EXPIRE_MINUTES: f64 = 30.0;

/// Policy token value meaning "use local expiration rules".
const LOCAL_POLICY: &str = "local";

/// How long a cache entry stays valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
  /// The entry never expires.
  Never,
  /// The entry expires this many minutes after it is written.
  /// Negative values produce an entry that is already expired.
  Minutes(f64),
}

impl Expiry {
  /// Absolute expiration timestamp (epoch millis) for an entry written at `now`.
  pub fn deadline(&self, now: i64) -> Option<i64> {
    match self {
      Expiry::Never => None,
      Expiry::Minutes(minutes) => {
        // Float to int casts saturate; an offset past the i64 range never expires.
        let offset = (minutes * 60_000.0).round() as i64;
        match now.checked_add(offset) {
          Some(deadline) => Some(deadline),
          None if offset > 0 => None,
          None => Some(i64::MIN),
        }
      }
    }
  }

  /// Expiration in minutes, rejecting NaN and infinities.
  pub fn minutes(minutes: f64) -> Result<Self, String> {
    if minutes.is_finite() {
      Ok(Expiry::Minutes(minutes))
    } else {
      Err(format!("invalid expiration '{}': minutes must be finite", minutes))
    }
  }
}

impl Default for Expiry {
  fn default() -> Self {
    Expiry::Minutes(DEFAULT_EXPIRE_MINUTES)
  }
}

impl fmt::Display for Expiry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expiry::Never => write!(f, "never"),
      Expiry::Minutes(m) => write!(f, "{}m", m),
    }
  }
}

impl FromStr for Expiry {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("never") {
      return Ok(Expiry::Never);
    }
    let minutes = s
      .parse::<f64>()
      .map_err(|_| format!("invalid expiration '{}': expected minutes or 'never'", s))?;
    Expiry::minutes(minutes)
  }
}

impl<'de> Deserialize<'de> for Expiry {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Minutes(f64),
      Word(String),
      Null(()),
    }

    match Raw::deserialize(deserializer)? {
      Raw::Minutes(m) => Expiry::minutes(m).map_err(serde::de::Error::custom),
      Raw::Word(w) => w.parse().map_err(serde::de::Error::custom),
      Raw::Null(()) => Ok(Expiry::Never),
    }
  }
}

/// Named cache policy attached to an entity or the application.
///
/// `Local` keeps the local expiration rules. `Header` names a response
/// header carrying a `max-age` directive that dictates the expiration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum PolicyToken {
  Local,
  Header(String),
}

impl From<String> for PolicyToken {
  fn from(value: String) -> Self {
    if value.eq_ignore_ascii_case(LOCAL_POLICY) {
      PolicyToken::Local
    } else {
      PolicyToken::Header(value)
    }
  }
}

impl From<&str> for PolicyToken {
  fn from(value: &str) -> Self {
    PolicyToken::from(value.to_string())
  }
}

/// Application-wide cache defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppDefaults {
  /// Cache every successful read unless something more specific says no.
  pub auto_cache: bool,
  /// Expiration used when nothing more specific is set.
  pub cache_expire: Expiry,
  /// Application-level policy token.
  pub cache_policy: Option<PolicyToken>,
}

/// The resolved decision for a single read.
#[derive(Debug, Clone, PartialEq)]
pub enum CachePolicy {
  /// Do not write the response to the cache.
  Disabled,
  /// Write the response using local expiration rules; `expire` is the
  /// per-call override if one was given.
  Local { expire: Option<Expiry> },
  /// Write the response using the `max-age` found in the named header.
  Server { header: String },
}

impl CachePolicy {
  pub fn is_enabled(&self) -> bool {
    !matches!(self, CachePolicy::Disabled)
  }
}

/// Return the first defined value from an ordered list of sources.
pub fn cascade<T>(sources: impl IntoIterator<Item = Option<T>>) -> Option<T> {
  sources.into_iter().flatten().next()
}

/// Resolve the cache policy for one read.
///
/// `owner` is the owning collection's settings for a model attached to a
/// collection. An explicit per-call `cache_local: false` always disables
/// caching, even under a server-driven policy token.
pub fn resolve(
  call: &FetchOptions,
  entity: &CacheSettings,
  owner: Option<&CacheSettings>,
  app: &AppDefaults,
) -> CachePolicy {
  if call.cache_local == Some(false) {
    return CachePolicy::Disabled;
  }

  let token = cascade([
    entity.cache_policy.clone(),
    owner.and_then(|o| o.cache_policy.clone()),
    app.cache_policy.clone(),
  ]);
  if let Some(PolicyToken::Header(header)) = token {
    return CachePolicy::Server { header };
  }

  let cache_local = cascade([
    call.cache_local,
    entity.cache_local,
    owner.and_then(|o| o.cache_local),
    Some(app.auto_cache),
  ])
  .unwrap_or(false);

  if cache_local {
    CachePolicy::Local {
      expire: call.expire_local,
    }
  } else {
    CachePolicy::Disabled
  }
}

/// Extract the `max-age` seconds from a cache-control style header value.
pub fn parse_max_age(value: &str) -> Option<u64> {
  value
    .split(',')
    .map(str::trim)
    .find_map(|directive| {
      let (name, seconds) = directive.split_once('=')?;
      name
        .trim()
        .eq_ignore_ascii_case("max-age")
        .then(|| seconds.trim().trim_matches('"'))
    })
    .and_then(|seconds| seconds.parse().ok())
}

/// Expiration dictated by a server header, or `None` if the response should
/// not be cached (no directive, or a zero max-age).
pub fn server_expiry(value: &str) -> Option<Expiry> {
  match parse_max_age(value)? {
    0 => None,
    seconds => Some(Expiry::Minutes(seconds as f64 / 60.0)),
  }
}
