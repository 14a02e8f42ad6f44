//! Clustered OAuth 2.0 token custodian: multi-tenant token caches, distributed refresh
//! locks, and budget-aware upstream retries in one crate built for worker fleets.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod http;
pub mod obs;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// self
	use crate::{
		auth::{AccountId, AccountRecord, TenantId, TokenSecret},
		coordinator::{Custodian, CustodianConfig},
		crypto::{Base64Cipher, TokenCipher},
		error::UpstreamError,
		http::{TokenGrant, UpstreamApi, UpstreamFuture},
		store::{AccountStore, MemoryAccountStore, MemoryCoordinationStore},
	};

	/// Memory-backed fixture bundle shared by one or more simulated worker processes.
	pub struct MemoryFixture {
		/// Durable account store shared across all custodians built from this fixture.
		pub accounts: Arc<MemoryAccountStore>,
		/// Coordination store shared across all custodians built from this fixture.
		pub coordination: Arc<MemoryCoordinationStore>,
		/// Reversible cipher used to seed and inspect stored secrets.
		pub cipher: Arc<Base64Cipher>,
	}
	impl MemoryFixture {
		/// Creates empty shared stores plus the test cipher.
		pub fn new() -> Self {
			Self {
				accounts: Arc::new(MemoryAccountStore::default()),
				coordination: Arc::new(MemoryCoordinationStore::default()),
				cipher: Arc::new(Base64Cipher),
			}
		}

		/// Builds a custodian on top of the shared stores, simulating one worker process.
		pub fn spawn_custodian(
			&self,
			upstream: Arc<dyn UpstreamApi>,
			config: CustodianConfig,
		) -> Arc<Custodian> {
			Arc::new(Custodian::new(
				self.accounts.clone(),
				self.coordination.clone(),
				self.cipher.clone(),
				upstream,
				config,
			))
		}

		/// Seeds an active account record whose secrets are encrypted with the fixture cipher.
		pub async fn seed_account(
			&self,
			tenant: &str,
			account: &str,
			access: &str,
			refresh: &str,
			expires_at: OffsetDateTime,
		) -> AccountRecord {
			let tenant = TenantId::new(tenant).expect("Tenant fixture identifier should be valid.");
			let account =
				AccountId::new(account).expect("Account fixture identifier should be valid.");
			let access_ct = self
				.cipher
				.encrypt(access)
				.await
				.expect("Fixture cipher should encrypt the access token.");
			let refresh_ct = self
				.cipher
				.encrypt(refresh)
				.await
				.expect("Fixture cipher should encrypt the refresh token.");
			let record = AccountRecord::new(account, tenant, access_ct, refresh_ct, expires_at);

			self.accounts
				.save(record.clone())
				.await
				.expect("Fixture account record should save successfully.");

			record
		}
	}
	impl Default for MemoryFixture {
		fn default() -> Self {
			Self::new()
		}
	}

	/// Scripted [`UpstreamApi`] stub that pops one canned response per call and counts
	/// every invocation.
	#[derive(Default)]
	pub struct ScriptedUpstream {
		responses: Mutex<VecDeque<Result<TokenGrant, UpstreamError>>>,
		calls: AtomicUsize,
		seen_refresh_tokens: Mutex<Vec<String>>,
	}
	impl ScriptedUpstream {
		/// Creates a stub with an empty script; unscripted calls fail loudly.
		pub fn new() -> Self {
			Self::default()
		}

		/// Queues one successful grant.
		pub fn push_grant(&self, access: &str, refresh: &str, expires_in: Duration) {
			self.responses.lock().push_back(Ok(TokenGrant {
				access_token: TokenSecret::new(access),
				refresh_token: Some(TokenSecret::new(refresh)),
				expires_in,
			}));
		}

		/// Queues one failure.
		pub fn push_error(&self, error: UpstreamError) {
			self.responses.lock().push_back(Err(error));
		}

		/// Number of refresh calls the stub has served.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		/// Refresh tokens the stub has been handed, in call order.
		pub fn seen_refresh_tokens(&self) -> Vec<String> {
			self.seen_refresh_tokens.lock().clone()
		}
	}
	impl UpstreamApi for ScriptedUpstream {
		fn refresh_credentials<'a>(
			&'a self,
			refresh_token: &'a str,
		) -> UpstreamFuture<'a, TokenGrant> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);
				self.seen_refresh_tokens.lock().push(refresh_token.to_owned());

				self.responses.lock().pop_front().unwrap_or_else(|| {
					Err(UpstreamError::Malformed {
						message: "Scripted upstream received an unexpected call".into(),
					})
				})
			})
		}
	}

	/// Custodian configuration tightened for fast test runs.
	pub fn test_config() -> CustodianConfig {
		CustodianConfig::default()
			.with_lock_poll_interval(Duration::milliseconds(10))
			.with_lock_wait(Duration::seconds(2))
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {httpmock as _, oauth2_custodian as _};
