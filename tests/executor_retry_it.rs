// std
use std::sync::atomic::{AtomicU32, Ordering};
// crates.io
use tokio::time::Instant;
// self
use oauth2_custodian::{
	_preludet::*,
	error::UpstreamError,
	executor::{RequestBudget, RequestExecutor, RetryPolicy},
};

fn executor(policy: RetryPolicy) -> RequestExecutor {
	RequestExecutor::new(policy, Arc::new(RequestBudget::new(1_000, Duration::hours(1))))
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_increase_strictly_up_to_the_cap() {
	let policy = RetryPolicy::default()
		.with_rate_limit_attempts(6)
		.with_base_delay(Duration::seconds(1))
		.with_max_delay(Duration::seconds(8));
	let executor = executor(policy);
	let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
	let error = executor
		.execute("it", || {
			let attempts = attempts.clone();

			async move {
				attempts.lock().push(Instant::now());

				Err::<(), _>(UpstreamError::status(429, "throttled"))
			}
		})
		.await
		.expect_err("Persistent throttling should exhaust the attempt cap.");

	assert!(matches!(error, UpstreamError::Status { status: 429, .. }));

	let attempts = attempts.lock();

	assert_eq!(attempts.len(), 6);

	let delays: Vec<_> = attempts.windows(2).map(|pair| pair[1] - pair[0]).collect();
	let expected: Vec<_> =
		[1_u64, 2, 4, 8, 8].into_iter().map(std::time::Duration::from_secs).collect();

	assert_eq!(delays, expected);

	let cap = std::time::Duration::from_secs(8);

	for pair in delays.windows(2) {
		assert!(
			pair[0] < pair[1] || pair[0] == cap,
			"Delays must strictly increase until the cap is reached."
		);
	}
}

#[tokio::test(start_paused = true)]
async fn retry_after_hints_override_the_backoff_ladder() {
	let executor = executor(RetryPolicy::default());
	let calls = Arc::new(AtomicU32::new(0));
	let started = Instant::now();
	let value = executor
		.execute("it", || {
			let calls = calls.clone();

			async move {
				if calls.fetch_add(1, Ordering::SeqCst) == 0 {
					Err(UpstreamError::Status {
						status: 429,
						oauth_error: None,
						retry_after: Some(Duration::seconds(7)),
						message: "throttled".into(),
					})
				} else {
					Ok(11_u8)
				}
			}
		})
		.await
		.expect("The retry should succeed once the hint elapses.");

	assert_eq!(value, 11);
	assert_eq!(calls.load(Ordering::SeqCst), 2);
	assert_eq!(started.elapsed(), std::time::Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn network_failures_share_the_transient_attempt_cap() {
	let policy = RetryPolicy::default()
		.with_transient_attempts(2)
		.with_base_delay(Duration::milliseconds(50));
	let executor = executor(policy);
	let calls = Arc::new(AtomicU32::new(0));
	let error = executor
		.execute("it", || {
			let calls = calls.clone();

			async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(UpstreamError::network(std::io::Error::other("connection reset")))
			}
		})
		.await
		.expect_err("Persistent network failures should exhaust the transient cap.");

	assert!(matches!(error, UpstreamError::Network { .. }));
	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn saturated_budget_delays_rather_than_rejects() {
	let budget = Arc::new(
		RequestBudget::new(2, Duration::seconds(60)).with_max_wait(Duration::seconds(120)),
	);
	let executor = RequestExecutor::new(RetryPolicy::default(), budget);
	let started = Instant::now();

	for _ in 0..2 {
		executor
			.execute("it", || async { Ok::<_, UpstreamError>(()) })
			.await
			.expect("In-budget calls should pass.");
	}

	assert!(started.elapsed() < std::time::Duration::from_secs(1));

	executor
		.execute("it", || async { Ok::<_, UpstreamError>(()) })
		.await
		.expect("The over-budget call should be delayed, not rejected.");

	assert!(started.elapsed() >= std::time::Duration::from_secs(60));
}
