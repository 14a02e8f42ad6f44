//! Account credential record and the partial updates applied to it.

// self
use crate::{
	_prelude::*,
	auth::{AccountId, Ciphertext, TenantId},
};

/// Durable credential record for one external account.
///
/// Exactly one record exists per account id; the durable store owns persistence while
/// the custodian owns every mutation after initial authorization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountRecord {
	/// Account identifier; the primary key in the durable store.
	pub account: AccountId,
	/// Tenant owning the account.
	pub tenant: TenantId,
	/// Encrypted access token blob.
	pub access_token: Ciphertext,
	/// Encrypted refresh token blob.
	pub refresh_token: Ciphertext,
	/// Expiry instant of the current access token.
	pub expires_at: OffsetDateTime,
	/// Whether the account participates in refresh scheduling.
	pub active: bool,
	/// Most recent failure note, cleared on successful rotation.
	pub last_error: Option<String>,
}
impl AccountRecord {
	/// Creates an active record, as written at initial authorization time.
	pub fn new(
		account: AccountId,
		tenant: TenantId,
		access_token: Ciphertext,
		refresh_token: Ciphertext,
		expires_at: OffsetDateTime,
	) -> Self {
		Self {
			account,
			tenant,
			access_token,
			refresh_token,
			expires_at,
			active: true,
			last_error: None,
		}
	}

	/// Returns `true` once the access token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Instant at which a proactive refresh becomes due.
	pub fn refresh_due_at(&self, safety_margin: Duration) -> OffsetDateTime {
		self.expires_at - safety_margin
	}

	/// Returns `true` when remaining validity has shrunk below the safety margin.
	pub fn needs_refresh_at(&self, instant: OffsetDateTime, safety_margin: Duration) -> bool {
		instant >= self.refresh_due_at(safety_margin)
	}
}

/// Partial update applied to an [`AccountRecord`].
///
/// `last_error` is doubly optional so a patch can distinguish "leave untouched"
/// from "clear the note".
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountPatch {
	/// Replacement access token blob.
	pub access_token: Option<Ciphertext>,
	/// Replacement refresh token blob.
	pub refresh_token: Option<Ciphertext>,
	/// Replacement expiry instant.
	pub expires_at: Option<OffsetDateTime>,
	/// Replacement active flag.
	pub active: Option<bool>,
	/// Replacement failure note (`Some(None)` clears it).
	pub last_error: Option<Option<String>>,
}
impl AccountPatch {
	/// Patch written after a successful refresh: new secrets, new expiry, error cleared.
	pub fn rotation(
		access_token: Ciphertext,
		refresh_token: Ciphertext,
		expires_at: OffsetDateTime,
	) -> Self {
		Self {
			access_token: Some(access_token),
			refresh_token: Some(refresh_token),
			expires_at: Some(expires_at),
			active: None,
			last_error: Some(None),
		}
	}

	/// Patch written when the account must be excluded from scheduling until the tenant
	/// re-authorizes.
	pub fn deactivation(reason: impl Into<String>) -> Self {
		Self { active: Some(false), last_error: Some(Some(reason.into())), ..Self::default() }
	}

	/// Patch written when a tenant re-authorizes a previously deactivated account.
	pub fn reactivation() -> Self {
		Self { active: Some(true), last_error: Some(None), ..Self::default() }
	}

	/// Patch recording a transient failure without touching secrets or the active flag.
	pub fn failure(reason: impl Into<String>) -> Self {
		Self { last_error: Some(Some(reason.into())), ..Self::default() }
	}

	/// Applies the patch in place.
	pub fn apply(self, record: &mut AccountRecord) {
		if let Some(value) = self.access_token {
			record.access_token = value;
		}
		if let Some(value) = self.refresh_token {
			record.refresh_token = value;
		}
		if let Some(value) = self.expires_at {
			record.expires_at = value;
		}
		if let Some(value) = self.active {
			record.active = value;
		}
		if let Some(value) = self.last_error {
			record.last_error = value;
		}
	}
}
