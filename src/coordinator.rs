//! Distributed refresh coordination: the crate's sole public token entry point.
//!
//! [`Custodian::valid_token`] serves a token from the tenant-isolated cache when it
//! can, and otherwise drives the full refresh path: process-local singleflight, a
//! TTL-bounded distributed lock, the upstream exchange through the rate-limited
//! executor, durable persistence, and proactive rescheduling. Expected per-account
//! failures (invalid grants, transient outages, lock contention) come back as
//! `Ok(None)` with the reason persisted on the account record; only infrastructure
//! failures surface as errors.

pub mod lock;
pub mod schedule;
pub mod sweep;

mod metrics;

pub use lock::*;
pub use metrics::*;
pub use schedule::*;
pub use sweep::*;

// self
use crate::{
	_prelude::*,
	auth::{AccountId, AccountPatch, AccountRecord, InstanceId, TenantId, TokenSecret},
	cache::TokenCache,
	crypto::TokenCipher,
	error::UpstreamError,
	executor::{RequestBudget, RequestExecutor, RetryPolicy, classify},
	http::UpstreamApi,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{AccountStore, CoordinationStore},
};

/// Tuning knobs for one custodian instance.
#[derive(Clone, Debug)]
pub struct CustodianConfig {
	/// Remaining-validity threshold below which a token is refreshed proactively.
	pub safety_margin: Duration,
	/// TTL stamped on every refresh lock acquisition.
	pub lock_ttl: Duration,
	/// Upper bound on waiting for another process's refresh to land.
	pub lock_wait: Duration,
	/// Interval between durable-store polls while waiting on a peer refresh.
	pub lock_poll_interval: Duration,
	/// Period of the proactive sweep cycle.
	pub sweep_interval: Duration,
	/// Period of the cache expiry sweep.
	pub cache_sweep_interval: Duration,
	/// Coordination key claimed by the elected sweep coordinator.
	pub election_key: String,
	/// TTL stamped on the election claim; slightly longer than the sweep period so a
	/// crashed coordinator frees the role within one cycle.
	pub election_ttl: Duration,
	/// Retry tuning handed to the request executor.
	pub retry: RetryPolicy,
	/// Maximum outbound requests per rolling budget window.
	pub budget_limit: usize,
	/// Rolling window the request budget is measured over.
	pub budget_window: Duration,
	/// Maximum time a call may spend queued on the budget.
	pub budget_wait: Duration,
}
impl CustodianConfig {
	/// Overrides the proactive-refresh safety margin.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Overrides the refresh lock TTL.
	pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
		self.lock_ttl = ttl;

		self
	}

	/// Overrides the peer-refresh wait bound.
	pub fn with_lock_wait(mut self, wait: Duration) -> Self {
		self.lock_wait = wait;

		self
	}

	/// Overrides the peer-refresh poll interval.
	pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
		self.lock_poll_interval = interval;

		self
	}

	/// Overrides the sweep period; the election TTL keeps its 1.5x relation.
	pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
		self.sweep_interval = interval;
		self.election_ttl = interval + interval / 2;

		self
	}

	/// Overrides the election key, isolating independent custodian fleets that share
	/// one coordination store.
	pub fn with_election_key(mut self, key: impl Into<String>) -> Self {
		self.election_key = key.into();

		self
	}

	/// Overrides the executor retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the outbound budget as `limit` requests per `window`.
	pub fn with_budget(mut self, limit: usize, window: Duration) -> Self {
		self.budget_limit = limit;
		self.budget_window = window;

		self
	}
}
impl Default for CustodianConfig {
	fn default() -> Self {
		Self {
			safety_margin: Duration::minutes(5),
			lock_ttl: Duration::seconds(30),
			lock_wait: Duration::seconds(30),
			lock_poll_interval: Duration::milliseconds(250),
			sweep_interval: Duration::seconds(60),
			cache_sweep_interval: Duration::seconds(60),
			election_key: "refresh-sweep-coordinator".into(),
			election_ttl: Duration::seconds(90),
			retry: RetryPolicy::default(),
			budget_limit: 600,
			budget_window: Duration::hours(1),
			budget_wait: Duration::seconds(30),
		}
	}
}

/// Valid token handed back to business logic.
#[derive(Clone, Debug)]
pub struct ValidToken {
	/// Tenant owning the account.
	pub tenant: TenantId,
	/// Decrypted access token.
	pub token: TokenSecret,
	/// Expiry instant of the token.
	pub expires_at: OffsetDateTime,
}

/// Per-process coordinator owning the cache, schedule, and refresh orchestration.
///
/// All state lives on the instance rather than in globals, so tests can run several
/// custodians against shared stores to simulate a cluster.
pub struct Custodian {
	accounts: Arc<dyn AccountStore>,
	coordination: Arc<dyn CoordinationStore>,
	cipher: Arc<dyn TokenCipher>,
	upstream: Arc<dyn UpstreamApi>,
	executor: RequestExecutor,
	cache: TokenCache,
	schedule: RefreshSchedule,
	instance: InstanceId,
	config: CustodianConfig,
	refresh_guards: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
	/// Shared counters for refresh outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
}
impl Custodian {
	/// Creates a custodian for this process with a freshly generated instance id.
	pub fn new(
		accounts: Arc<dyn AccountStore>,
		coordination: Arc<dyn CoordinationStore>,
		cipher: Arc<dyn TokenCipher>,
		upstream: Arc<dyn UpstreamApi>,
		config: CustodianConfig,
	) -> Self {
		let budget = Arc::new(
			RequestBudget::new(config.budget_limit, config.budget_window)
				.with_max_wait(config.budget_wait),
		);

		Self {
			accounts,
			coordination,
			cipher,
			upstream,
			executor: RequestExecutor::new(config.retry.clone(), budget),
			cache: TokenCache::new(config.safety_margin),
			schedule: RefreshSchedule::default(),
			instance: InstanceId::generate(),
			config,
			refresh_guards: Default::default(),
			refresh_metrics: Default::default(),
		}
	}

	/// Replaces the generated instance id, mainly to pin owner values in tests.
	pub fn with_instance(mut self, instance: InstanceId) -> Self {
		self.instance = instance;

		self
	}

	/// Instance id used as the owner value for locks and the election.
	pub fn instance(&self) -> &InstanceId {
		&self.instance
	}

	/// Configuration in force for this instance.
	pub fn config(&self) -> &CustodianConfig {
		&self.config
	}

	/// This process's token cache.
	pub fn cache(&self) -> &TokenCache {
		&self.cache
	}

	/// This process's proactive refresh schedule.
	pub fn schedule(&self) -> &RefreshSchedule {
		&self.schedule
	}

	/// The executor guarding the upstream budget; resource-call sites share it.
	pub fn executor(&self) -> &RequestExecutor {
		&self.executor
	}

	/// Returns a currently valid access token for the account, refreshing if needed.
	///
	/// `Ok(None)` covers every expected denial: unknown or deactivated accounts,
	/// invalid grants (which deactivate the account), transient upstream failures, and
	/// lock-wait timeouts. Callers should retry later unless the account record shows
	/// it needs re-authorization.
	pub async fn valid_token(&self, account: &AccountId) -> Result<Option<ValidToken>> {
		const KIND: FlowKind = FlowKind::Lookup;

		let span = FlowSpan::new(KIND, "valid_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.valid_token_inner(account)).await;

		match &result {
			Ok(Some(_)) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			_ => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Clears the inactive flag and failure note after a tenant re-authorizes, and
	/// drops any cached token so the next lookup reads the re-authorized record.
	pub async fn reactivate(&self, account: &AccountId) -> Result<()> {
		self.accounts.update(account, AccountPatch::reactivation()).await?;

		if let Some(record) = self.accounts.fetch(account).await? {
			self.cache.invalidate(&record.tenant, &record.account);
		}

		Ok(())
	}

	async fn valid_token_inner(&self, account: &AccountId) -> Result<Option<ValidToken>> {
		let Some(record) = self.accounts.fetch(account).await? else {
			return Ok(None);
		};

		if !record.active {
			return Ok(None);
		}
		if let Some(found) = self.cache_lookup(&record.tenant, account) {
			return Ok(Some(found));
		}

		// Process-local singleflight: concurrent callers for one account park here and
		// usually find the cache repopulated, never touching the distributed lock.
		let guard = self.refresh_guard(account);
		let outcome = {
			let _inflight = guard.lock().await;

			match self.cache_lookup(&record.tenant, account) {
				Some(found) => Ok(Some(found)),
				None => {
					self.refresh_metrics.record_attempt();

					let refreshed = self.refresh_or_follow(account).await;

					match &refreshed {
						Ok(Some(_)) => self.refresh_metrics.record_success(),
						_ => self.refresh_metrics.record_failure(),
					}

					refreshed
				},
			}
		};

		self.prune_refresh_guard(account, &guard);

		outcome
	}

	/// Refresh path once the caller holds the process-local guard: serve a record a
	/// peer already rotated, or acquire the distributed lock and rotate here, or
	/// follow the peer that currently holds it.
	async fn refresh_or_follow(&self, account: &AccountId) -> Result<Option<ValidToken>> {
		// Re-read before locking: the cache can miss while the durable record is
		// already fresh (process restart, or a peer rotated it since our first read).
		let Some(record) = self.accounts.fetch(account).await? else {
			return Ok(None);
		};

		if !record.active {
			return Ok(None);
		}
		if !record.needs_refresh_at(OffsetDateTime::now_utc(), self.config.safety_margin) {
			return self.serve_from_store(&record).await;
		}

		let lock = RefreshLock::for_account(
			self.coordination.clone(),
			account,
			self.instance.clone(),
			self.config.lock_ttl,
		);

		if !lock.try_acquire().await? {
			return self.await_peer_refresh(account, record.expires_at).await;
		}

		let refreshed = self.refresh_holding_lock(account).await;

		// The TTL reclaims the lock if this delete fails or a newer owner took over.
		let _ = lock.release().await;

		refreshed
	}

	/// Runs the refresh exchange while holding the distributed lock.
	async fn refresh_holding_lock(&self, account: &AccountId) -> Result<Option<ValidToken>> {
		const KIND: FlowKind = FlowKind::Refresh;

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		// Re-read under the lock: another process may have rotated the refresh token
		// between our first read and acquisition, and replaying the superseded secret
		// would burn the whole grant chain.
		let Some(record) = self.accounts.fetch(account).await? else {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);

			return Ok(None);
		};

		if !record.active {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);

			return Ok(None);
		}

		let now = OffsetDateTime::now_utc();

		if !record.needs_refresh_at(now, self.config.safety_margin) {
			let served = self.serve_from_store(&record).await;
			let outcome = match &served {
				Ok(Some(_)) => FlowOutcome::Success,
				_ => FlowOutcome::Failure,
			};

			obs::record_flow_outcome(KIND, outcome);

			return served;
		}

		let refresh_secret = match self.cipher.decrypt(&record.refresh_token).await {
			Ok(secret) => secret,
			Err(error) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
				self.deactivate(
					&record,
					format!("Stored refresh token could not be decrypted: {error}"),
				)
				.await?;

				return Ok(None);
			},
		};
		let exchange = self
			.executor
			.execute("refresh_credentials", || {
				self.upstream.refresh_credentials(refresh_secret.expose())
			})
			.await;
		let grant = match exchange {
			Ok(grant) => grant,
			Err(error) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);

				return self.note_refresh_failure(&record, error).await;
			},
		};

		if !grant.expires_in.is_positive() {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);

			return self
				.note_refresh_failure(&record, UpstreamError::Malformed {
					message: "grant carries a non-positive lifetime".into(),
				})
				.await;
		}

		let issued_at = OffsetDateTime::now_utc();
		let expires_at = grant.expires_at(issued_at);
		let rotated_refresh =
			grant.refresh_token.clone().unwrap_or_else(|| refresh_secret.clone());
		let access_ct = match self.cipher.encrypt(grant.access_token.expose()).await {
			Ok(ct) => ct,
			Err(error) => return self.abandon_rotation(&record, KIND, error).await,
		};
		let refresh_ct = match self.cipher.encrypt(rotated_refresh.expose()).await {
			Ok(ct) => ct,
			Err(error) => return self.abandon_rotation(&record, KIND, error).await,
		};

		// Persist before the lock is released so a peer polling the durable store can
		// only ever observe a fully rotated record.
		self.accounts
			.update(account, AccountPatch::rotation(access_ct, refresh_ct, expires_at))
			.await?;
		self.cache.put(
			record.tenant.clone(),
			account.clone(),
			grant.access_token.clone(),
			expires_at,
		);
		self.schedule.schedule(account.clone(), expires_at - self.config.safety_margin);
		obs::record_flow_outcome(KIND, FlowOutcome::Success);

		Ok(Some(ValidToken {
			tenant: record.tenant.clone(),
			token: grant.access_token,
			expires_at,
		}))
	}

	/// Bounded poll for a refresh another process is performing.
	///
	/// Success is observed through the durable store's expiry advancing, after which
	/// the record is re-fetched and decrypted rather than trusting any in-memory copy.
	/// Timing out returns `Ok(None)`; the caller retries later and no state changes.
	async fn await_peer_refresh(
		&self,
		account: &AccountId,
		observed_expiry: OffsetDateTime,
	) -> Result<Option<ValidToken>> {
		let deadline =
			tokio::time::Instant::now() + crate::executor::std_duration(self.config.lock_wait);

		loop {
			if tokio::time::Instant::now() >= deadline {
				return Ok(None);
			}

			tokio::time::sleep(crate::executor::std_duration(self.config.lock_poll_interval))
				.await;

			let Some(current) = self.accounts.fetch(account).await? else {
				return Ok(None);
			};

			if !current.active {
				return Ok(None);
			}

			let now = OffsetDateTime::now_utc();

			if current.expires_at > observed_expiry && now < current.expires_at {
				return self.serve_from_store(&current).await;
			}
		}
	}

	/// Decrypts the stored access token, repopulates the cache, and ensures the account
	/// is scheduled for its next proactive refresh.
	async fn serve_from_store(&self, record: &AccountRecord) -> Result<Option<ValidToken>> {
		match self.cipher.decrypt(&record.access_token).await {
			Ok(token) => {
				self.cache.put(
					record.tenant.clone(),
					record.account.clone(),
					token.clone(),
					record.expires_at,
				);

				if !self.schedule.contains(&record.account) {
					self.schedule.schedule(
						record.account.clone(),
						record.refresh_due_at(self.config.safety_margin),
					);
				}

				Ok(Some(ValidToken {
					tenant: record.tenant.clone(),
					token,
					expires_at: record.expires_at,
				}))
			},
			Err(error) => {
				self.deactivate(
					record,
					format!("Stored access token could not be decrypted: {error}"),
				)
				.await?;

				Ok(None)
			},
		}
	}

	/// Classifies an exhausted upstream failure: invalid credentials deactivate the
	/// account until re-authorization, everything else is noted and left retryable.
	async fn note_refresh_failure(
		&self,
		record: &AccountRecord,
		error: UpstreamError,
	) -> Result<Option<ValidToken>> {
		match classify::classify(&error) {
			classify::ErrorClass::InvalidCredential => {
				self.deactivate(record, format!("Upstream rejected the refresh grant: {error}"))
					.await?;
			},
			_ => {
				self.accounts
					.update(&record.account, AccountPatch::failure(error.to_string()))
					.await?;
			},
		}

		Ok(None)
	}

	/// Encryption outage while rotating: the durable record keeps its old, still-valid
	/// secrets and the account stays active for a later retry.
	async fn abandon_rotation(
		&self,
		record: &AccountRecord,
		kind: FlowKind,
		error: crate::crypto::CipherError,
	) -> Result<Option<ValidToken>> {
		obs::record_flow_outcome(kind, FlowOutcome::Failure);
		self.accounts
			.update(
				&record.account,
				AccountPatch::failure(format!("Failed to encrypt rotated tokens: {error}")),
			)
			.await?;

		Ok(None)
	}

	async fn deactivate(&self, record: &AccountRecord, reason: String) -> Result<()> {
		self.refresh_metrics.record_deactivation();
		self.cache.invalidate(&record.tenant, &record.account);
		self.accounts.update(&record.account, AccountPatch::deactivation(reason)).await?;

		Ok(())
	}

	fn cache_lookup(&self, tenant: &TenantId, account: &AccountId) -> Option<ValidToken> {
		self.cache.get(tenant, account).filter(|hit| !hit.needs_refresh).map(|hit| ValidToken {
			tenant: tenant.clone(),
			token: hit.token,
			expires_at: hit.expires_at,
		})
	}

	/// Returns (and creates on demand) the singleflight guard for an account.
	fn refresh_guard(&self, account: &AccountId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.refresh_guards.lock();

		guards.entry(account.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	/// Drops the singleflight entry once no other caller is parked on it, keeping the
	/// guard map bounded by in-flight accounts instead of every account ever seen.
	///
	/// Cloning out of the map only happens under the map lock, so a strong count of
	/// two (the map's handle plus ours) proves nobody else holds the guard.
	fn prune_refresh_guard(&self, account: &AccountId, guard: &Arc<AsyncMutex<()>>) {
		let mut guards = self.refresh_guards.lock();

		if Arc::strong_count(guard) == 2
			&& guards.get(account).is_some_and(|current| Arc::ptr_eq(current, guard))
		{
			guards.remove(account);
		}
	}
}
impl Debug for Custodian {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Custodian")
			.field("instance", &self.instance)
			.field("config", &self.config)
			.finish()
	}
}
