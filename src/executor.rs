//! Budget-aware retry executor wrapping every outbound upstream call.
//!
//! Refresh exchanges and ordinary resource calls share one upstream quota, so both
//! funnel through [`RequestExecutor::execute`]: the call first charges the global
//! [`RequestBudget`], then runs, and on failure consults the pure classifier in
//! [`classify`] to decide between an exponential-backoff retry and an immediate
//! propagation.

pub mod budget;
pub mod classify;

pub use budget::RequestBudget;
pub use classify::{ErrorClass, RetryDecision};

// self
use crate::{_prelude::*, error::UpstreamError};

/// Retry tuning for the executor's backoff ladder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Maximum attempts for rate-limited (HTTP 429) failures.
	pub rate_limit_attempts: u32,
	/// Maximum attempts for transient failures (5xx, network, timeout).
	pub transient_attempts: u32,
	/// First backoff delay; doubled after every failed attempt.
	pub base_delay: Duration,
	/// Ceiling applied to the backoff ladder.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Overrides the attempt cap for rate-limited failures.
	pub fn with_rate_limit_attempts(mut self, attempts: u32) -> Self {
		self.rate_limit_attempts = attempts.max(1);

		self
	}

	/// Overrides the attempt cap for transient failures.
	pub fn with_transient_attempts(mut self, attempts: u32) -> Self {
		self.transient_attempts = attempts.max(1);

		self
	}

	/// Overrides the initial backoff delay.
	pub fn with_base_delay(mut self, delay: Duration) -> Self {
		self.base_delay = if delay.is_negative() { Duration::ZERO } else { delay };

		self
	}

	/// Overrides the backoff ceiling.
	pub fn with_max_delay(mut self, delay: Duration) -> Self {
		self.max_delay = if delay < self.base_delay { self.base_delay } else { delay };

		self
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			rate_limit_attempts: 5,
			transient_attempts: 3,
			base_delay: Duration::seconds(1),
			max_delay: Duration::seconds(60),
		}
	}
}

/// Executes outbound calls under a shared budget with classified retries.
#[derive(Clone, Debug)]
pub struct RequestExecutor {
	policy: RetryPolicy,
	budget: Arc<RequestBudget>,
}
impl RequestExecutor {
	/// Creates an executor around the provided policy and shared budget.
	pub fn new(policy: RetryPolicy, budget: Arc<RequestBudget>) -> Self {
		Self { policy, budget }
	}

	/// Returns the retry policy in force.
	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Returns the shared request budget, so resource-call sites can reuse it.
	pub fn budget(&self) -> &Arc<RequestBudget> {
		&self.budget
	}

	/// Runs `call` until it succeeds, exhausts its retry class, or fails terminally.
	///
	/// Every attempt (including retries) charges the budget. Non-retryable
	/// classifications stop the loop immediately and exhausting a retry class returns
	/// the last error unmodified.
	pub async fn execute<T, F, Fut>(
		&self,
		operation: &'static str,
		mut call: F,
	) -> Result<T, UpstreamError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, UpstreamError>>,
	{
		let mut attempt: u32 = 0;

		loop {
			self.budget.reserve().await?;

			attempt += 1;

			let error = match call().await {
				Ok(value) => return Ok(value),
				Err(error) => error,
			};
			let decision = classify::decide(&self.policy, &error, attempt);

			if !decision.retry {
				return Err(error);
			}

			#[cfg(feature = "tracing")]
			tracing::debug!(
				operation,
				attempt,
				delay_ms = decision.delay.whole_milliseconds() as i64,
				"Retrying upstream call."
			);
			#[cfg(not(feature = "tracing"))]
			let _ = operation;

			tokio::time::sleep(std_duration(decision.delay)).await;
		}
	}
}

/// Converts the crate's signed durations into the unsigned form the runtime expects,
/// clamping negatives to zero.
pub(crate) fn std_duration(duration: Duration) -> std::time::Duration {
	duration.try_into().unwrap_or(std::time::Duration::ZERO)
}
