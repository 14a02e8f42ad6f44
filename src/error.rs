//! Custodian-level error types shared across the cache, executor, and coordinator.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical custodian error exposed by public APIs.
///
/// Expected per-account conditions (invalid grants, transient upstream outages) never
/// travel through this enum from the coordinator; they are absorbed into the account
/// record and surface as an absent token. Only infrastructure failures propagate.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Durable account store failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Coordination store failure (refresh locks, sweep election).
	#[error("{0}")]
	Coordination(
		#[from]
		#[source]
		crate::store::CoordinationError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Encryption service failure.
	#[error(transparent)]
	Cipher(#[from] crate::crypto::CipherError),
	/// Upstream API failure that survived executor retries.
	#[error(transparent)]
	Upstream(#[from] UpstreamError),

	/// Upstream rejected the refresh grant; the account needs re-authorization.
	#[error("Upstream rejected the refresh grant: {reason}.")]
	InvalidGrant {
		/// Upstream- or custodian-supplied reason string.
		reason: String,
	},
}

/// Configuration and validation failures raised by the custodian.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Failure emitted by one outbound call to the upstream API.
///
/// The executor's classifier inspects these variants to pick a retry class, so
/// transports must preserve HTTP statuses, OAuth error codes, and `Retry-After`
/// hints instead of flattening them into strings.
#[derive(Debug, ThisError)]
pub enum UpstreamError {
	/// Upstream answered with a non-success HTTP status.
	#[error("Upstream returned HTTP {status}: {message}.")]
	Status {
		/// HTTP status code returned by the upstream endpoint.
		status: u16,
		/// OAuth `error` code carried by the response body, when present.
		oauth_error: Option<String>,
		/// Retry-After hint expressed as a relative duration.
		retry_after: Option<Duration>,
		/// Short human-readable summary of the response.
		message: String,
	},
	/// Transport-level failure (DNS, TCP, TLS, connection reset).
	#[error("Network error occurred while calling the upstream API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The call exceeded its deadline.
	#[error("Upstream call timed out during {operation}.")]
	Timeout {
		/// Logical operation label supplied by the caller.
		operation: &'static str,
	},
	/// Upstream answered with a body that could not be parsed.
	#[error("Upstream returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Upstream answered 2xx with a semantically unusable payload.
	#[error("Upstream returned an unusable token payload: {message}.")]
	Malformed {
		/// Description of the violated expectation.
		message: String,
	},
	/// The outbound request budget stayed saturated past the queue bound.
	#[error("Outbound request budget stayed exhausted after waiting {waited}.")]
	BudgetExhausted {
		/// Time the caller spent queued before giving up.
		waited: Duration,
	},
}
impl UpstreamError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Builds a status error without OAuth metadata or retry hints.
	pub fn status(status: u16, message: impl Into<String>) -> Self {
		Self::Status { status, oauth_error: None, retry_after: None, message: message.into() }
	}

	/// Returns the upstream `Retry-After` hint, when one was supplied.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Status { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// Returns the OAuth `error` code carried by the response, when present.
	pub fn oauth_error(&self) -> Option<&str> {
		match self {
			Self::Status { oauth_error, .. } => oauth_error.as_deref(),
			_ => None,
		}
	}
}
