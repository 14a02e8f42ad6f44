//! Pure classification of upstream failures into retry classes.
//!
//! Keeping classification free of I/O lets the retry loop stay a dumb driver:
//! [`classify`] names the failure class, [`decide`] turns a class plus the attempt
//! counter into a concrete retry/stop verdict with a delay.

// self
use crate::{_prelude::*, error::UpstreamError, executor::RetryPolicy};

/// Retry-relevant category for an [`UpstreamError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
	/// Upstream throttled the call (HTTP 429).
	RateLimited,
	/// Temporary failure (5xx, network, timeout); safe to retry.
	Transient,
	/// Credentials are invalid or forbidden; retrying cannot help.
	InvalidCredential,
	/// The addressed resource does not exist upstream.
	NotFound,
	/// Non-retryable failure outside the other categories.
	Permanent,
}
impl ErrorClass {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorClass::RateLimited => "rate_limited",
			ErrorClass::Transient => "transient",
			ErrorClass::InvalidCredential => "invalid_credential",
			ErrorClass::NotFound => "not_found",
			ErrorClass::Permanent => "permanent",
		}
	}
}
impl Display for ErrorClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Verdict produced by [`decide`] for one failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
	/// Whether the executor should try again.
	pub retry: bool,
	/// Delay to wait before the next attempt.
	pub delay: Duration,
}
impl RetryDecision {
	const STOP: Self = Self { retry: false, delay: Duration::ZERO };

	fn after(delay: Duration) -> Self {
		Self { retry: true, delay }
	}
}

/// Classifies an upstream failure.
pub fn classify(error: &UpstreamError) -> ErrorClass {
	match error {
		UpstreamError::Status { status: 429, .. } => ErrorClass::RateLimited,
		UpstreamError::Status { status, oauth_error, .. } =>
			classify_status(*status, oauth_error.as_deref()),
		UpstreamError::Network { .. } | UpstreamError::Timeout { .. } => ErrorClass::Transient,
		UpstreamError::ResponseParse { .. } | UpstreamError::Malformed { .. } =>
			ErrorClass::Transient,
		UpstreamError::BudgetExhausted { .. } => ErrorClass::Transient,
	}
}

/// Decides whether a failed attempt should be retried and after how long.
///
/// `attempt` is the 1-based count of attempts already made, including the one that
/// just failed. Rate-limited failures honor the upstream `Retry-After` hint when one
/// was supplied; everything retryable otherwise climbs the exponential ladder.
pub fn decide(policy: &RetryPolicy, error: &UpstreamError, attempt: u32) -> RetryDecision {
	match classify(error) {
		ErrorClass::RateLimited if attempt < policy.rate_limit_attempts => {
			let delay = error.retry_after().unwrap_or_else(|| backoff_delay(policy, attempt));

			RetryDecision::after(delay)
		},
		ErrorClass::Transient if attempt < policy.transient_attempts =>
			RetryDecision::after(backoff_delay(policy, attempt)),
		_ => RetryDecision::STOP,
	}
}

/// Exponential ladder: the base delay doubled per completed attempt, capped.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
	let exponent = attempt.saturating_sub(1).min(30);
	let factor = 2_i32.saturating_pow(exponent);
	let scaled = policy.base_delay.checked_mul(factor).unwrap_or(policy.max_delay);

	scaled.min(policy.max_delay)
}

fn classify_status(status: u16, oauth_error: Option<&str>) -> ErrorClass {
	if oauth_error.is_some_and(invalid_credential_code) {
		return ErrorClass::InvalidCredential;
	}

	match status {
		401 | 403 => ErrorClass::InvalidCredential,
		404 => ErrorClass::NotFound,
		code if code >= 500 => ErrorClass::Transient,
		_ => ErrorClass::Permanent,
	}
}

fn invalid_credential_code(value: &str) -> bool {
	value.eq_ignore_ascii_case("invalid_grant")
		|| value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
		|| value.eq_ignore_ascii_case("access_denied")
}
