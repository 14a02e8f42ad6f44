// self
use oauth2_custodian::{
	_preludet::*,
	auth::AccountId,
	coordinator::refresh_lock_key,
	crypto::TokenCipher,
	error::UpstreamError,
	executor::RetryPolicy,
	store::{AccountStore, CoordinationStore},
};

fn account(value: &str) -> AccountId {
	AccountId::new(value).expect("Account identifier fixture should be valid.")
}

#[tokio::test(flavor = "multi_thread")]
async fn two_processes_perform_one_refresh_for_a_shared_account() {
	let fixture = MemoryFixture::new();
	let upstream_a = Arc::new(ScriptedUpstream::new());
	let upstream_b = Arc::new(ScriptedUpstream::new());

	upstream_a.push_grant("access-rotated", "refresh-rotated", Duration::seconds(3600));
	upstream_b.push_grant("access-rotated", "refresh-rotated", Duration::seconds(3600));

	let process_a = fixture.spawn_custodian(upstream_a.clone(), test_config());
	let process_b = fixture.spawn_custodian(upstream_b.clone(), test_config());
	let old_expiry = OffsetDateTime::now_utc() + Duration::minutes(4);

	fixture
		.seed_account("tenant-shared", "acct-shared", "access-stale", "refresh-stale", old_expiry)
		.await;

	let account = account("acct-shared");
	let (first, second) =
		tokio::join!(process_a.valid_token(&account), process_b.valid_token(&account));
	let first = first
		.expect("First lookup should not hit infrastructure errors.")
		.expect("First caller should receive a token.");
	let second = second
		.expect("Second lookup should not hit infrastructure errors.")
		.expect("Second caller should receive a token.");

	assert_eq!(first.token.expose(), "access-rotated");
	assert_eq!(second.token.expose(), "access-rotated");
	assert_eq!(
		upstream_a.calls() + upstream_b.calls(),
		1,
		"Exactly one upstream refresh must happen cluster-wide."
	);

	let stored = fixture
		.accounts
		.fetch(&account)
		.await
		.expect("Store fetch should succeed.")
		.expect("Record should remain present after the refresh.");

	assert!(stored.expires_at > old_expiry, "Expiry must advance by the upstream lifetime.");
	assert!(stored.active);
	assert_eq!(stored.last_error, None);

	let rotated_refresh = fixture
		.cipher
		.decrypt(&stored.refresh_token)
		.await
		.expect("Rotated refresh token should decrypt.");

	assert_eq!(rotated_refresh.expose(), "refresh-rotated");
}

#[tokio::test]
async fn token_inside_the_safety_margin_is_refreshed_not_served() {
	let fixture = MemoryFixture::new();
	let upstream = Arc::new(ScriptedUpstream::new());

	upstream.push_grant("access-early", "refresh-early", Duration::seconds(1800));

	let custodian = fixture.spawn_custodian(upstream.clone(), test_config());

	// Four minutes of validity left against a five-minute margin.
	fixture
		.seed_account(
			"tenant-margin",
			"acct-margin",
			"access-old",
			"refresh-old",
			OffsetDateTime::now_utc() + Duration::minutes(4),
		)
		.await;

	let token = custodian
		.valid_token(&account("acct-margin"))
		.await
		.expect("Lookup should not hit infrastructure errors.")
		.expect("A refreshed token should be produced.");

	assert_eq!(token.token.expose(), "access-early");
	assert_eq!(upstream.calls(), 1);
	assert_eq!(upstream.seen_refresh_tokens(), ["refresh-old"]);
}

#[tokio::test]
async fn fresh_stored_token_is_served_without_an_upstream_call() {
	let fixture = MemoryFixture::new();
	let upstream = Arc::new(ScriptedUpstream::new());
	let custodian = fixture.spawn_custodian(upstream.clone(), test_config());

	fixture
		.seed_account(
			"tenant-warm",
			"acct-warm",
			"access-fresh",
			"refresh-fresh",
			OffsetDateTime::now_utc() + Duration::minutes(30),
		)
		.await;

	let account = account("acct-warm");
	let first = custodian
		.valid_token(&account)
		.await
		.expect("First lookup should not hit infrastructure errors.")
		.expect("Stored token should be served.");

	assert_eq!(first.token.expose(), "access-fresh");

	let second = custodian
		.valid_token(&account)
		.await
		.expect("Second lookup should not hit infrastructure errors.")
		.expect("Cached token should be served.");

	assert_eq!(second.token.expose(), "access-fresh");
	assert_eq!(upstream.calls(), 0, "Neither lookup may reach the upstream API.");
	assert!(custodian.schedule().contains(&account), "Serving must schedule the next refresh.");
}

#[tokio::test]
async fn invalid_grant_deactivates_the_account_until_reauthorization() {
	let fixture = MemoryFixture::new();
	let upstream = Arc::new(ScriptedUpstream::new());

	upstream.push_error(UpstreamError::Status {
		status: 400,
		oauth_error: Some("invalid_grant".into()),
		retry_after: None,
		message: "refresh token revoked".into(),
	});

	let custodian = fixture.spawn_custodian(upstream.clone(), test_config());

	fixture
		.seed_account(
			"tenant-revoked",
			"acct-revoked",
			"access-old",
			"refresh-burned",
			OffsetDateTime::now_utc() + Duration::minutes(1),
		)
		.await;

	let account = account("acct-revoked");

	assert!(
		custodian
			.valid_token(&account)
			.await
			.expect("Lookup should not hit infrastructure errors.")
			.is_none()
	);

	let stored = fixture
		.accounts
		.fetch(&account)
		.await
		.expect("Store fetch should succeed.")
		.expect("Record should remain present for inspection.");

	assert!(!stored.active, "Invalid grants must deactivate the account.");
	assert!(
		stored.last_error.as_deref().is_some_and(|note| note.contains("rejected")),
		"The failure reason must be persisted."
	);

	// The deactivated account must short-circuit without reaching upstream again.
	assert!(
		custodian
			.valid_token(&account)
			.await
			.expect("Second lookup should not hit infrastructure errors.")
			.is_none()
	);
	assert_eq!(upstream.calls(), 1);
	assert_eq!(custodian.refresh_metrics.deactivations(), 1);

	// Re-authorization brings the account back into scheduling.
	custodian.reactivate(&account).await.expect("Reactivation should succeed.");

	let stored = fixture
		.accounts
		.fetch(&account)
		.await
		.expect("Store fetch should succeed.")
		.expect("Record should remain present after reactivation.");

	assert!(stored.active);
	assert_eq!(stored.last_error, None);
}

#[tokio::test]
async fn transient_upstream_failures_leave_the_account_retryable() {
	let fixture = MemoryFixture::new();
	let upstream = Arc::new(ScriptedUpstream::new());

	upstream.push_error(UpstreamError::status(503, "service melting"));
	upstream.push_grant("access-recovered", "refresh-recovered", Duration::seconds(3600));

	let config =
		test_config().with_retry(RetryPolicy::default().with_transient_attempts(1));
	let custodian = fixture.spawn_custodian(upstream.clone(), config);

	fixture
		.seed_account(
			"tenant-flaky",
			"acct-flaky",
			"access-old",
			"refresh-old",
			OffsetDateTime::now_utc() + Duration::minutes(1),
		)
		.await;

	let account = account("acct-flaky");

	assert!(
		custodian
			.valid_token(&account)
			.await
			.expect("Failed lookup should not raise infrastructure errors.")
			.is_none()
	);

	let stored = fixture
		.accounts
		.fetch(&account)
		.await
		.expect("Store fetch should succeed.")
		.expect("Record should remain present after the failure.");

	assert!(stored.active, "Transient failures must not deactivate the account.");
	assert!(stored.last_error.as_deref().is_some_and(|note| note.contains("503")));

	let token = custodian
		.valid_token(&account)
		.await
		.expect("Retry lookup should not hit infrastructure errors.")
		.expect("The retry should produce a token once upstream recovers.");

	assert_eq!(token.token.expose(), "access-recovered");
	assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn foreign_lock_contention_times_out_to_none() {
	let fixture = MemoryFixture::new();
	let upstream = Arc::new(ScriptedUpstream::new());
	let config = test_config()
		.with_lock_wait(Duration::milliseconds(200))
		.with_lock_poll_interval(Duration::milliseconds(20));
	let custodian = fixture.spawn_custodian(upstream.clone(), config);

	fixture
		.seed_account(
			"tenant-contended",
			"acct-contended",
			"access-old",
			"refresh-old",
			OffsetDateTime::now_utc() + Duration::minutes(1),
		)
		.await;

	let account = account("acct-contended");

	// A peer that never finishes holds the refresh lock for the whole wait window.
	assert!(
		fixture
			.coordination
			.set_if_absent(&refresh_lock_key(&account), "worker-foreign", Duration::minutes(5))
			.await
			.expect("Foreign lock should be plantable.")
	);
	assert!(
		custodian
			.valid_token(&account)
			.await
			.expect("Contended lookup should not raise infrastructure errors.")
			.is_none(),
		"Lock contention without store progress must time out to None."
	);
	assert_eq!(upstream.calls(), 0);

	let stored = fixture
		.accounts
		.fetch(&account)
		.await
		.expect("Store fetch should succeed.")
		.expect("Record should remain present after the timeout.");

	assert!(stored.active, "A lock-wait timeout must not change account state.");
	assert_eq!(stored.last_error, None);
}
