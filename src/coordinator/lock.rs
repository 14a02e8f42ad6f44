//! Cluster-wide refresh lock keyed per account.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{AccountId, InstanceId},
	store::{CoordinationError, CoordinationStore},
};

/// Mutual-exclusion guard for one account's refresh, backed by the coordination store.
///
/// Acquisition is a single atomic check-and-set that only succeeds while the key is
/// absent, every acquisition carries a TTL so a crashed owner cannot wedge the
/// account, and release is owner-checked so one instance can never delete a lock a
/// newer owner holds.
pub struct RefreshLock {
	store: Arc<dyn CoordinationStore>,
	key: String,
	owner: InstanceId,
	ttl: Duration,
}
impl RefreshLock {
	/// Builds the lock handle for an account; nothing is acquired yet.
	pub fn for_account(
		store: Arc<dyn CoordinationStore>,
		account: &AccountId,
		owner: InstanceId,
		ttl: Duration,
	) -> Self {
		Self { store, key: refresh_lock_key(account), owner, ttl }
	}

	/// Attempts one atomic acquisition; `false` means another instance holds the lock.
	pub async fn try_acquire(&self) -> Result<bool, CoordinationError> {
		self.store.set_if_absent(&self.key, self.owner.as_ref(), self.ttl).await
	}

	/// Releases the lock if this instance still owns it.
	pub async fn release(&self) -> Result<bool, CoordinationError> {
		self.store.delete_if_owner(&self.key, self.owner.as_ref()).await
	}

	/// Returns the owner value currently stored under the lock key, if any.
	pub async fn holder(&self) -> Result<Option<String>, CoordinationError> {
		self.store.get(&self.key).await
	}

	/// Coordination key this lock lives under.
	pub fn key(&self) -> &str {
		&self.key
	}
}
impl Debug for RefreshLock {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshLock")
			.field("key", &self.key)
			.field("owner", &self.owner)
			.field("ttl", &self.ttl)
			.finish()
	}
}

/// Coordination key for an account's refresh lock.
///
/// Account ids are caller-supplied, so the key embeds a digest instead of the raw id
/// to stay inside backend key charset and length limits.
pub fn refresh_lock_key(account: &AccountId) -> String {
	let digest = Sha256::digest(account.as_ref().as_bytes());

	format!("refresh-lock:{}", URL_SAFE_NO_PAD.encode(digest))
}
