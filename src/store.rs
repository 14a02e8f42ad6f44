//! Storage contracts for the durable account store and the coordination store.
//!
//! Both backends are shared across worker processes and are therefore consumed
//! exclusively through atomic or conditional operations: the account store applies
//! partial patches server-side, and the coordination store exposes the
//! check-and-set primitives the refresh lock and sweep election are built on.

pub mod memory;

pub use memory::{MemoryAccountStore, MemoryCoordinationStore};

// self
use crate::{
	_prelude::*,
	auth::{AccountId, AccountPatch, AccountRecord},
};

/// Boxed future returned by [`AccountStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Boxed future returned by [`CoordinationStore`] operations.
pub type CoordinationFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, CoordinationError>> + 'a + Send>>;

/// Durable credential store contract, keyed by account id.
pub trait AccountStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the credential record for an account.
	fn save(&self, record: AccountRecord) -> StoreFuture<'_, ()>;

	/// Fetches the credential record for an account, if present.
	fn fetch<'a>(&'a self, account: &'a AccountId) -> StoreFuture<'a, Option<AccountRecord>>;

	/// Applies a partial update to an existing record.
	fn update<'a>(&'a self, account: &'a AccountId, patch: AccountPatch) -> StoreFuture<'a, ()>;

	/// Lists every record whose active flag is set, for the proactive sweep.
	fn list_active(&self) -> StoreFuture<'_, Vec<AccountRecord>>;
}

/// Cluster-wide key-value contract backing refresh locks and the sweep election.
///
/// Implementations must make [`set_if_absent`](CoordinationStore::set_if_absent) a
/// single atomic check-and-set and expire entries on their own once the TTL lapses,
/// so a crashed owner never wedges a key permanently.
pub trait CoordinationStore
where
	Self: Send + Sync,
{
	/// Atomically stores `value` under `key` with a TTL, only if the key is absent.
	fn set_if_absent<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Duration,
	) -> CoordinationFuture<'a, bool>;

	/// Returns the live value stored under `key`, if any.
	fn get<'a>(&'a self, key: &'a str) -> CoordinationFuture<'a, Option<String>>;

	/// Deletes `key` only while it still holds `expected`; returns whether a delete
	/// happened.
	fn delete_if_owner<'a>(
		&'a self,
		key: &'a str,
		expected: &'a str,
	) -> CoordinationFuture<'a, bool>;
}

/// Error type produced by [`AccountStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A patch addressed an account id with no record.
	#[error("No credential record exists for account {account}.")]
	MissingAccount {
		/// Account id the patch addressed.
		account: String,
	},
}

/// Error type produced by [`CoordinationStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CoordinationError {
	/// Backend-level failure for the coordination engine.
	#[error("Coordination backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_errors_serialize_for_transport() {
		let payload = serde_json::to_string(&StoreError::MissingAccount { account: "a-1".into() })
			.expect("StoreError should serialize to JSON.");
		let round_trip: StoreError =
			serde_json::from_str(&payload).expect("Serialized error should deserialize.");

		assert_eq!(round_trip, StoreError::MissingAccount { account: "a-1".into() });
	}

	#[test]
	fn coordination_error_formats_message() {
		let error = CoordinationError::Backend { message: "connection refused".into() };

		assert!(error.to_string().contains("connection refused"));
	}
}
