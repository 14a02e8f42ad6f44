//! Redacting wrappers for plaintext tokens and encrypted blobs.

// self
use crate::_prelude::*;

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Opaque encrypted blob produced by the external encryption service.
///
/// The custodian never interprets the contents; it only shuttles them between the
/// durable store and the [`TokenCipher`](crate::crypto::TokenCipher).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(String);
impl Ciphertext {
	/// Wraps an encrypted blob.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw ciphertext for storage or decryption.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for Ciphertext {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for Ciphertext {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Ciphertext").field(&"<redacted>").finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
	}

	#[test]
	fn ciphertext_debug_redacts() {
		let blob = Ciphertext::new("0xdeadbeef");

		assert_eq!(format!("{blob:?}"), "Ciphertext(\"<redacted>\")");
		assert_eq!(blob.expose(), "0xdeadbeef");
	}
}
