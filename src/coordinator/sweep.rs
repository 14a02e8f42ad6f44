//! Periodic proactive sweep and cluster coordinator election.
//!
//! Every instance drains its own schedule each cycle, but only the instance holding
//! the election key scans the full account store. The claim carries a TTL slightly
//! longer than the cycle period and is renewed by its holder every cycle, so a
//! crashed coordinator frees the role for whichever instance's next cycle fires
//! first.

// crates.io
use rand::Rng;
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	auth::AccountId,
	coordinator::Custodian,
	executor::std_duration,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Summary of one sweep cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
	/// Whether this instance won (or renewed) the coordinator election.
	pub elected: bool,
	/// Locally scheduled accounts that came due and were processed.
	pub drained: usize,
	/// Active accounts examined during the elected scan.
	pub scanned: usize,
	/// Accounts for which a valid token was produced.
	pub refreshed: usize,
	/// Accounts that stayed without a token after processing.
	pub failed: usize,
}

impl Custodian {
	/// Runs one sweep cycle: drains locally due schedule entries, then, if this
	/// instance holds or wins the election, scans every active account, refreshing the
	/// due ones and scheduling the rest.
	pub async fn run_sweep_cycle(&self) -> Result<SweepReport> {
		const KIND: FlowKind = FlowKind::Sweep;

		let span = FlowSpan::new(KIND, "run_sweep_cycle");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.sweep_cycle_inner()).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn sweep_cycle_inner(&self) -> Result<SweepReport> {
		let mut report = SweepReport::default();
		let now = OffsetDateTime::now_utc();

		for account in self.schedule().drain_due(now) {
			report.drained += 1;
			self.sweep_account(&account, &mut report).await;
		}

		report.elected = self.try_elect().await?;

		if !report.elected {
			return Ok(report);
		}

		let margin = self.config().safety_margin;
		let active = self.accounts.list_active().await?;

		for record in active {
			report.scanned += 1;

			if record.needs_refresh_at(now, margin) {
				self.sweep_account(&record.account, &mut report).await;
			} else if !self.schedule().contains(&record.account) {
				let due_at = record.refresh_due_at(margin);

				self.schedule().schedule(record.account, due_at);
			}
		}

		Ok(report)
	}

	async fn sweep_account(&self, account: &AccountId, report: &mut SweepReport) {
		// A single stubborn account must not abort the cycle; its failure is already
		// recorded on the account record.
		match self.valid_token(account).await {
			Ok(Some(_)) => report.refreshed += 1,
			_ => report.failed += 1,
		}
	}

	/// Claims or renews the sweep election for this cycle.
	async fn try_elect(&self) -> Result<bool> {
		let key = self.config().election_key.as_str();
		let me = self.instance().as_ref();
		let ttl = self.config().election_ttl;

		if self.coordination.set_if_absent(key, me, ttl).await? {
			return Ok(true);
		}
		if self.coordination.get(key).await?.as_deref() == Some(me) {
			// Still the coordinator from a previous cycle; refresh the claim's TTL.
			self.coordination.delete_if_owner(key, me).await?;

			return Ok(self.coordination.set_if_absent(key, me, ttl).await?);
		}

		Ok(false)
	}
}

/// Spawns the recurring sweep loop for this instance.
///
/// The first cycle is delayed by a random fraction of the period so a fleet booting
/// together does not stampede the election key in lockstep.
pub fn spawn_sweeper(custodian: Arc<Custodian>) -> JoinHandle<()> {
	tokio::spawn(async move {
		let period = std_duration(custodian.config().sweep_interval)
			.max(std::time::Duration::from_millis(1));
		let stagger = period.mul_f64(rand::rng().random_range(0.0..1.0));

		tokio::time::sleep(stagger).await;

		let mut ticker = tokio::time::interval(period);

		loop {
			ticker.tick().await;

			let _ = custodian.run_sweep_cycle().await;
		}
	})
}

/// Spawns the cache expiry sweep for this instance.
pub fn spawn_cache_sweeper(custodian: Arc<Custodian>) -> JoinHandle<()> {
	custodian.cache().spawn_sweeper(custodian.config().cache_sweep_interval)
}
