//! Global sliding-window budget for outbound upstream calls.

// std
use std::collections::VecDeque;
// crates.io
use tokio::time::Instant;
// self
use crate::{_prelude::*, error::UpstreamError, executor::std_duration};

/// Rolling-window request budget shared by every outbound call in the process.
///
/// The ledger holds the instant of each charge still inside the window. Callers over
/// budget are parked until the oldest charge slides out, bounded by the configured
/// maximum wait; exceeding that bound fails with
/// [`UpstreamError::BudgetExhausted`] instead of queuing forever.
#[derive(Debug)]
pub struct RequestBudget {
	limit: usize,
	window: std::time::Duration,
	max_wait: std::time::Duration,
	ledger: Mutex<VecDeque<Instant>>,
}
impl RequestBudget {
	/// Default queue bound applied while the window is saturated.
	pub const DEFAULT_MAX_WAIT: Duration = Duration::seconds(30);

	/// Creates a budget of `limit` requests per rolling `window`.
	pub fn new(limit: usize, window: Duration) -> Self {
		Self {
			limit: limit.max(1),
			window: std_duration(window),
			max_wait: std_duration(Self::DEFAULT_MAX_WAIT),
			ledger: Mutex::new(VecDeque::new()),
		}
	}

	/// Overrides the maximum time a caller may spend queued.
	pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
		self.max_wait = std_duration(max_wait);

		self
	}

	/// Charges one request slot, waiting while the window is saturated.
	pub async fn reserve(&self) -> Result<(), UpstreamError> {
		let started = Instant::now();

		loop {
			let wakeup = {
				let mut ledger = self.ledger.lock();
				let now = Instant::now();

				Self::prune(&mut ledger, now, self.window);

				if ledger.len() < self.limit {
					ledger.push_back(now);

					return Ok(());
				}

				// The oldest charge leaving the window frees the next slot.
				match ledger.front() {
					Some(oldest) => *oldest + self.window,
					None => now,
				}
			};

			if wakeup.saturating_duration_since(started) > self.max_wait {
				return Err(UpstreamError::BudgetExhausted {
					waited: Duration::seconds_f64(started.elapsed().as_secs_f64()),
				});
			}

			tokio::time::sleep_until(wakeup).await;
		}
	}

	/// Number of charges currently inside the window.
	pub fn charged(&self) -> usize {
		let mut ledger = self.ledger.lock();

		Self::prune(&mut ledger, Instant::now(), self.window);

		ledger.len()
	}

	fn prune(ledger: &mut VecDeque<Instant>, now: Instant, window: std::time::Duration) {
		while ledger.front().is_some_and(|charge| now.saturating_duration_since(*charge) >= window)
		{
			ledger.pop_front();
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn saturated_window_queues_until_a_slot_frees() {
		let budget = RequestBudget::new(2, Duration::seconds(60))
			.with_max_wait(Duration::seconds(120));

		budget.reserve().await.expect("First charge should fit the window.");
		budget.reserve().await.expect("Second charge should fit the window.");

		assert_eq!(budget.charged(), 2);

		let queued_at = Instant::now();

		budget.reserve().await.expect("Third charge should queue, not fail.");

		assert!(queued_at.elapsed() >= std::time::Duration::from_secs(60));
	}

	#[tokio::test(start_paused = true)]
	async fn queue_bound_fails_transiently() {
		let budget =
			RequestBudget::new(1, Duration::seconds(60)).with_max_wait(Duration::seconds(5));

		budget.reserve().await.expect("First charge should fit the window.");

		let error = budget.reserve().await.expect_err("Queue bound should reject the wait.");

		assert!(matches!(error, UpstreamError::BudgetExhausted { .. }));
	}

	#[tokio::test(start_paused = true)]
	async fn charges_expire_out_of_the_window() {
		let budget = RequestBudget::new(1, Duration::seconds(10));

		budget.reserve().await.expect("First charge should fit the window.");

		assert_eq!(budget.charged(), 1);

		tokio::time::sleep(std::time::Duration::from_secs(11)).await;

		assert_eq!(budget.charged(), 0);
	}
}
