//! Thread-safe in-memory store implementations for tests and single-node runs.

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::{AccountId, AccountPatch, AccountRecord},
	store::{AccountStore, CoordinationFuture, CoordinationStore, StoreError, StoreFuture},
};

type AccountMap = Arc<RwLock<HashMap<AccountId, AccountRecord>>>;

/// Thread-safe [`AccountStore`] that keeps records in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryAccountStore(AccountMap);
impl MemoryAccountStore {
	fn save_now(map: AccountMap, record: AccountRecord) {
		map.write().insert(record.account.clone(), record);
	}

	fn fetch_now(map: AccountMap, account: AccountId) -> Option<AccountRecord> {
		map.read().get(&account).cloned()
	}

	fn update_now(
		map: AccountMap,
		account: AccountId,
		patch: AccountPatch,
	) -> Result<(), StoreError> {
		let mut guard = map.write();

		match guard.get_mut(&account) {
			Some(record) => {
				patch.apply(record);

				Ok(())
			},
			None => Err(StoreError::MissingAccount { account: account.to_string() }),
		}
	}

	fn list_active_now(map: AccountMap) -> Vec<AccountRecord> {
		map.read().values().filter(|record| record.active).cloned().collect()
	}
}
impl AccountStore for MemoryAccountStore {
	fn save(&self, record: AccountRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			Self::save_now(map, record);

			Ok(())
		})
	}

	fn fetch<'a>(&'a self, account: &'a AccountId) -> StoreFuture<'a, Option<AccountRecord>> {
		let map = self.0.clone();
		let account = account.to_owned();

		Box::pin(async move { Ok(Self::fetch_now(map, account)) })
	}

	fn update<'a>(&'a self, account: &'a AccountId, patch: AccountPatch) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let account = account.to_owned();

		Box::pin(async move { Self::update_now(map, account, patch) })
	}

	fn list_active(&self) -> StoreFuture<'_, Vec<AccountRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::list_active_now(map)) })
	}
}

#[derive(Clone, Debug)]
struct CoordinationEntry {
	value: String,
	expires_at: Instant,
}

type CoordinationMap = Arc<Mutex<HashMap<String, CoordinationEntry>>>;

/// In-process [`CoordinationStore`] with lazy TTL expiry.
///
/// TTLs ride on `tokio::time::Instant`, so paused-clock tests can fast-forward a
/// lock past its lifetime deterministically.
#[derive(Clone, Debug, Default)]
pub struct MemoryCoordinationStore(CoordinationMap);
impl MemoryCoordinationStore {
	fn prune(guard: &mut HashMap<String, CoordinationEntry>, key: &str, now: Instant) {
		if guard.get(key).is_some_and(|entry| entry.expires_at <= now) {
			guard.remove(key);
		}
	}

	fn set_if_absent_now(map: CoordinationMap, key: String, value: String, ttl: Duration) -> bool {
		let now = Instant::now();
		let ttl: std::time::Duration = ttl.try_into().unwrap_or_default();
		let mut guard = map.lock();

		Self::prune(&mut guard, &key, now);

		if guard.contains_key(&key) {
			return false;
		}

		guard.insert(key, CoordinationEntry { value, expires_at: now + ttl });

		true
	}

	fn get_now(map: CoordinationMap, key: String) -> Option<String> {
		let now = Instant::now();
		let mut guard = map.lock();

		Self::prune(&mut guard, &key, now);

		guard.get(&key).map(|entry| entry.value.clone())
	}

	fn delete_if_owner_now(map: CoordinationMap, key: String, expected: String) -> bool {
		let now = Instant::now();
		let mut guard = map.lock();

		Self::prune(&mut guard, &key, now);

		if guard.get(&key).is_some_and(|entry| entry.value == expected) {
			guard.remove(&key);

			return true;
		}

		false
	}
}
impl CoordinationStore for MemoryCoordinationStore {
	fn set_if_absent<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Duration,
	) -> CoordinationFuture<'a, bool> {
		let map = self.0.clone();
		let key = key.to_owned();
		let value = value.to_owned();

		Box::pin(async move { Ok(Self::set_if_absent_now(map, key, value, ttl)) })
	}

	fn get<'a>(&'a self, key: &'a str) -> CoordinationFuture<'a, Option<String>> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Ok(Self::get_now(map, key)) })
	}

	fn delete_if_owner<'a>(
		&'a self,
		key: &'a str,
		expected: &'a str,
	) -> CoordinationFuture<'a, bool> {
		let map = self.0.clone();
		let key = key.to_owned();
		let expected = expected.to_owned();

		Box::pin(async move { Ok(Self::delete_if_owner_now(map, key, expected)) })
	}
}
