// self
use oauth2_custodian::{
	_preludet::*,
	auth::{AccountId, AccountPatch},
	store::AccountStore,
};

fn account(value: &str) -> AccountId {
	AccountId::new(value).expect("Account identifier fixture should be valid.")
}

#[tokio::test]
async fn only_one_instance_scans_per_cycle_and_the_claim_renews() {
	let fixture = MemoryFixture::new();
	let process_a = fixture.spawn_custodian(Arc::new(ScriptedUpstream::new()), test_config());
	let process_b = fixture.spawn_custodian(Arc::new(ScriptedUpstream::new()), test_config());

	let first = process_a.run_sweep_cycle().await.expect("First cycle should succeed.");
	let second = process_b.run_sweep_cycle().await.expect("Second cycle should succeed.");

	assert!(first.elected, "The first instance to claim the key performs the scan.");
	assert!(!second.elected, "A second instance in the same cycle must skip the scan.");

	// Next cycle: the incumbent renews its claim and stays the coordinator.
	let renewed = process_a.run_sweep_cycle().await.expect("Renewal cycle should succeed.");
	let challenger =
		process_b.run_sweep_cycle().await.expect("Challenger cycle should succeed.");

	assert!(renewed.elected);
	assert!(!challenger.elected);
}

#[tokio::test]
async fn sweep_refreshes_due_accounts_and_schedules_the_rest() {
	let fixture = MemoryFixture::new();
	let upstream = Arc::new(ScriptedUpstream::new());

	upstream.push_grant("access-swept", "refresh-swept", Duration::seconds(3600));

	let custodian = fixture.spawn_custodian(upstream.clone(), test_config());
	let now = OffsetDateTime::now_utc();

	fixture
		.seed_account("tenant-sweep", "acct-due", "access-a", "refresh-a", now + Duration::minutes(2))
		.await;
	fixture
		.seed_account("tenant-sweep", "acct-fresh", "access-b", "refresh-b", now + Duration::hours(2))
		.await;

	let report = custodian.run_sweep_cycle().await.expect("Sweep cycle should succeed.");

	assert!(report.elected);
	assert_eq!(report.scanned, 2);
	assert_eq!(report.refreshed, 1, "Only the due account takes an upstream refresh.");
	assert_eq!(report.failed, 0);
	assert_eq!(upstream.calls(), 1);
	assert_eq!(upstream.seen_refresh_tokens(), ["refresh-a"]);
	assert!(
		custodian.schedule().contains(&account("acct-fresh")),
		"Accounts that are not yet due must be registered for their refresh instant."
	);

	let stored = fixture
		.accounts
		.fetch(&account("acct-due"))
		.await
		.expect("Store fetch should succeed.")
		.expect("Due account should remain present.");

	assert!(stored.expires_at > now + Duration::minutes(30), "The due account must be rotated.");
}

#[tokio::test]
async fn deactivated_accounts_are_invisible_to_the_sweep() {
	let fixture = MemoryFixture::new();
	let upstream = Arc::new(ScriptedUpstream::new());
	let custodian = fixture.spawn_custodian(upstream.clone(), test_config());
	let target = account("acct-disabled");

	fixture
		.seed_account(
			"tenant-disabled",
			"acct-disabled",
			"access-x",
			"refresh-x",
			OffsetDateTime::now_utc() + Duration::minutes(1),
		)
		.await;
	fixture
		.accounts
		.update(&target, AccountPatch::deactivation("needs re-authorization"))
		.await
		.expect("Deactivation patch should apply.");

	let report = custodian.run_sweep_cycle().await.expect("Sweep cycle should succeed.");

	assert!(report.elected);
	assert_eq!(report.scanned, 0, "Inactive accounts must be excluded from the scan.");
	assert_eq!(upstream.calls(), 0);
}
