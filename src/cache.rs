//! Tenant-isolated in-process cache of decrypted, currently-valid tokens.
//!
//! Entries are never persisted and never shared across processes. Lookups key on
//! `(tenant, account)` even though account ids are globally unique, so a cross-tenant
//! read is unrepresentable rather than merely unlikely.

// self
use crate::{
	_prelude::*,
	auth::{AccountId, TenantId, TokenSecret},
	executor::std_duration,
};

/// Composite cache key; the tenant component makes cross-tenant leakage structurally
/// impossible.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
	/// Tenant owning the cached token.
	pub tenant: TenantId,
	/// Account the token belongs to.
	pub account: AccountId,
}

/// Lookup result carrying the token plus its freshness verdict.
#[derive(Clone, Debug)]
pub struct CachedToken {
	/// Decrypted access token.
	pub token: TokenSecret,
	/// Expiry instant of the token.
	pub expires_at: OffsetDateTime,
	/// True once remaining validity has shrunk below the safety margin.
	pub needs_refresh: bool,
}

#[derive(Clone, Debug)]
struct CacheSlot {
	token: TokenSecret,
	expires_at: OffsetDateTime,
}

type SlotMap = Arc<RwLock<HashMap<CacheKey, CacheSlot>>>;

/// Per-process memoization of valid tokens with expiry-tied TTLs.
#[derive(Clone, Debug)]
pub struct TokenCache {
	slots: SlotMap,
	safety_margin: Duration,
}
impl TokenCache {
	/// Creates an empty cache flagging entries within `safety_margin` of expiry.
	pub fn new(safety_margin: Duration) -> Self {
		Self { slots: Default::default(), safety_margin }
	}

	/// Safety margin this cache evaluates freshness against.
	pub fn safety_margin(&self) -> Duration {
		self.safety_margin
	}

	/// Looks up a token for the tenant/account pair using the current clock.
	pub fn get(&self, tenant: &TenantId, account: &AccountId) -> Option<CachedToken> {
		self.get_at(tenant, account, OffsetDateTime::now_utc())
	}

	/// Looks up a token evaluating freshness at the provided instant.
	///
	/// An entry whose expiry has passed is removed on the spot and reported as a miss.
	pub fn get_at(
		&self,
		tenant: &TenantId,
		account: &AccountId,
		now: OffsetDateTime,
	) -> Option<CachedToken> {
		let key = CacheKey { tenant: tenant.clone(), account: account.clone() };
		let found = self.slots.read().get(&key).cloned();
		let slot = found?;

		if now >= slot.expires_at {
			self.slots.write().remove(&key);

			return None;
		}

		let needs_refresh = slot.expires_at - now <= self.safety_margin;

		Some(CachedToken { token: slot.token, expires_at: slot.expires_at, needs_refresh })
	}

	/// Inserts or replaces the cached token for a tenant/account pair.
	pub fn put(
		&self,
		tenant: TenantId,
		account: AccountId,
		token: TokenSecret,
		expires_at: OffsetDateTime,
	) {
		let key = CacheKey { tenant, account };

		self.slots.write().insert(key, CacheSlot { token, expires_at });
	}

	/// Drops the entry for one tenant/account pair.
	pub fn invalidate(&self, tenant: &TenantId, account: &AccountId) {
		let key = CacheKey { tenant: tenant.clone(), account: account.clone() };

		self.slots.write().remove(&key);
	}

	/// Drops every entry belonging to the tenant.
	pub fn invalidate_tenant(&self, tenant: &TenantId) {
		self.slots.write().retain(|key, _| key.tenant != *tenant);
	}

	/// Removes entries whose expiry has passed; returns how many were dropped.
	pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
		let mut slots = self.slots.write();
		let before = slots.len();

		slots.retain(|_, slot| slot.expires_at > now);

		before - slots.len()
	}

	/// Number of live entries (expired entries still pending a sweep included).
	pub fn len(&self) -> usize {
		self.slots.read().len()
	}

	/// Returns `true` when no entries are cached.
	pub fn is_empty(&self) -> bool {
		self.slots.read().is_empty()
	}

	/// Spawns the periodic expiry sweep bounding this process's cache memory.
	pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
		let cache = self.clone();

		tokio::spawn(async move {
			// `interval` panics on a zero period.
			let period = std_duration(interval).max(std::time::Duration::from_millis(1));
			let mut ticker = tokio::time::interval(period);

			loop {
				ticker.tick().await;
				cache.purge_expired(OffsetDateTime::now_utc());
			}
		})
	}
}
