//! Upstream OAuth API contract and the reqwest-backed token client.
//!
//! Implementations perform exactly one HTTP call per invocation and surface raw
//! status, OAuth error codes, and `Retry-After` hints through
//! [`UpstreamError`](crate::error::UpstreamError); retries, budgets, and backoff all
//! belong to [`RequestExecutor`](crate::executor::RequestExecutor).

// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
#[cfg(feature = "reqwest")]
use crate::{error::ConfigError, executor::std_duration};
use crate::{_prelude::*, auth::TokenSecret, error::UpstreamError};

/// Boxed future returned by [`UpstreamApi`] calls.
pub type UpstreamFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, UpstreamError>> + 'a + Send>>;

/// Contract for the upstream token endpoint consumed by the refresh coordinator.
pub trait UpstreamApi
where
	Self: Send + Sync,
{
	/// Exchanges a refresh token for a new access/refresh token pair.
	fn refresh_credentials<'a>(&'a self, refresh_token: &'a str) -> UpstreamFuture<'a, TokenGrant>;
}

/// Token material returned by a successful refresh exchange.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// New access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token; providers that do not rotate omit it and the previous
	/// secret stays valid.
	pub refresh_token: Option<TokenSecret>,
	/// Upstream-reported access token lifetime.
	pub expires_in: Duration,
}
impl TokenGrant {
	/// Absolute expiry for a grant issued at the provided instant.
	pub fn expires_at(&self, issued_at: OffsetDateTime) -> OffsetDateTime {
		issued_at + self.expires_in
	}
}

/// Reqwest-backed [`UpstreamApi`] client for one provider token endpoint.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestUpstream {
	client: ReqwestClient,
	token_endpoint: Url,
	client_id: String,
	client_secret: Option<String>,
}
#[cfg(feature = "reqwest")]
impl ReqwestUpstream {
	/// Builds a client with the provided per-call timeout and redirects disabled.
	///
	/// Token endpoints return results directly; a redirecting endpoint indicates a
	/// configuration problem, not something to follow.
	pub fn new(
		token_endpoint: Url,
		client_id: impl Into<String>,
		timeout: Duration,
	) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.timeout(std_duration(timeout))
			.build()
			.map_err(ConfigError::from)?;

		Ok(Self::with_client(client, token_endpoint, client_id))
	}

	/// Wraps an existing [`ReqwestClient`]; callers keep responsibility for timeout and
	/// redirect policy.
	pub fn with_client(
		client: ReqwestClient,
		token_endpoint: Url,
		client_id: impl Into<String>,
	) -> Self {
		Self { client, token_endpoint, client_id: client_id.into(), client_secret: None }
	}

	/// Sets or replaces the confidential client secret sent with each exchange.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, UpstreamError> {
		let mut form = vec![
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("client_id", self.client_id.as_str()),
		];

		if let Some(secret) = self.client_secret.as_deref() {
			form.push(("client_secret", secret));
		}

		let response = self
			.client
			.post(self.token_endpoint.clone())
			.form(&form)
			.send()
			.await
			.map_err(map_send_error)?;
		let status = response.status();
		let headers = response.headers().to_owned();
		let bytes = response.bytes().await.map_err(map_send_error)?;

		if !status.is_success() {
			return Err(error_from_response(status.as_u16(), &headers, &bytes));
		}

		parse_grant(&bytes, status.as_u16())
	}
}
#[cfg(feature = "reqwest")]
impl UpstreamApi for ReqwestUpstream {
	fn refresh_credentials<'a>(&'a self, refresh_token: &'a str) -> UpstreamFuture<'a, TokenGrant> {
		Box::pin(self.exchange(refresh_token))
	}
}

#[cfg(feature = "reqwest")]
#[derive(Deserialize)]
struct WireGrant {
	access_token: String,
	refresh_token: Option<String>,
	expires_in: Option<i64>,
}

#[cfg(feature = "reqwest")]
#[derive(Deserialize)]
struct WireError {
	error: Option<String>,
	error_description: Option<String>,
}

#[cfg(feature = "reqwest")]
fn parse_grant(bytes: &[u8], status: u16) -> Result<TokenGrant, UpstreamError> {
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);
	let wire: WireGrant = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| UpstreamError::ResponseParse { source, status: Some(status) })?;
	let expires_in = wire.expires_in.ok_or_else(|| UpstreamError::Malformed {
		message: "token response is missing expires_in".into(),
	})?;

	if expires_in <= 0 {
		return Err(UpstreamError::Malformed {
			message: format!("token response carries a non-positive expires_in of {expires_in}"),
		});
	}

	Ok(TokenGrant {
		access_token: TokenSecret::new(wire.access_token),
		refresh_token: wire.refresh_token.map(TokenSecret::new),
		expires_in: Duration::seconds(expires_in),
	})
}

#[cfg(feature = "reqwest")]
fn map_send_error(err: ReqwestError) -> UpstreamError {
	if err.is_timeout() {
		return UpstreamError::Timeout { operation: "token_refresh" };
	}

	UpstreamError::network(err)
}

#[cfg(feature = "reqwest")]
fn error_from_response(status: u16, headers: &HeaderMap, bytes: &[u8]) -> UpstreamError {
	let retry_after = parse_retry_after(headers);
	let wire: Option<WireError> = serde_json::from_slice(bytes).ok();
	let (oauth_error, description) = match wire {
		Some(payload) => (payload.error, payload.error_description),
		None => (None, None),
	};
	let message = description.unwrap_or_else(|| body_preview(bytes));

	UpstreamError::Status { status, oauth_error, retry_after, message }
}

#[cfg(feature = "reqwest")]
fn body_preview(bytes: &[u8]) -> String {
	const PREVIEW_LIMIT: usize = 256;

	let text = String::from_utf8_lossy(bytes);

	if text.chars().count() <= PREVIEW_LIMIT {
		return text.into_owned();
	}

	let mut buf = String::new();

	for (idx, ch) in text.chars().enumerate() {
		if idx >= PREVIEW_LIMIT {
			buf.push('…');

			break;
		}

		buf.push(ch);
	}

	buf
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;

	#[test]
	fn grant_parsing_validates_lifetime() {
		let grant = parse_grant(
			br#"{"access_token":"a1","refresh_token":"r1","token_type":"bearer","expires_in":3600}"#,
			200,
		)
		.expect("Well-formed grant payload should parse.");

		assert_eq!(grant.access_token.expose(), "a1");
		assert_eq!(grant.refresh_token.as_ref().map(TokenSecret::expose), Some("r1"));
		assert_eq!(grant.expires_in, Duration::seconds(3600));

		let missing = parse_grant(br#"{"access_token":"a1"}"#, 200)
			.expect_err("Missing expires_in should be rejected.");

		assert!(matches!(missing, UpstreamError::Malformed { .. }));

		let negative = parse_grant(br#"{"access_token":"a1","expires_in":-5}"#, 200)
			.expect_err("Non-positive expires_in should be rejected.");

		assert!(matches!(negative, UpstreamError::Malformed { .. }));
	}

	#[test]
	fn error_responses_surface_oauth_codes_and_hints() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, "12".parse().expect("Header fixture should parse."));

		let error = error_from_response(
			429,
			&headers,
			br#"{"error":"slow_down","error_description":"too many refreshes"}"#,
		);

		match error {
			UpstreamError::Status { status, oauth_error, retry_after, message } => {
				assert_eq!(status, 429);
				assert_eq!(oauth_error.as_deref(), Some("slow_down"));
				assert_eq!(retry_after, Some(Duration::seconds(12)));
				assert_eq!(message, "too many refreshes");
			},
			other => panic!("Expected a status error, got {other:?}."),
		}
	}

	#[test]
	fn non_json_error_bodies_fall_back_to_a_preview() {
		let error = error_from_response(502, &HeaderMap::new(), b"Bad Gateway");

		match error {
			UpstreamError::Status { status, oauth_error, message, .. } => {
				assert_eq!(status, 502);
				assert_eq!(oauth_error, None);
				assert_eq!(message, "Bad Gateway");
			},
			other => panic!("Expected a status error, got {other:?}."),
		}
	}
}
