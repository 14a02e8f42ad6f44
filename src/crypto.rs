//! Encryption service contract guarding tokens at rest.
//!
//! The custodian treats encryption as an opaque external collaborator: blobs go in,
//! blobs come out, and a decryption failure on stored data is fatal for the owning
//! account because no retry can repair a corrupt or mismatched-key ciphertext.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	auth::{Ciphertext, TokenSecret},
};

/// Boxed future returned by [`TokenCipher`] operations.
pub type CipherFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CipherError>> + 'a + Send>>;

/// Contract for the external encrypt/decrypt service protecting stored tokens.
pub trait TokenCipher
where
	Self: Send + Sync,
{
	/// Encrypts a plaintext token for durable storage.
	fn encrypt<'a>(&'a self, plaintext: &'a str) -> CipherFuture<'a, Ciphertext>;

	/// Decrypts a stored blob back into a usable token.
	fn decrypt<'a>(&'a self, ciphertext: &'a Ciphertext) -> CipherFuture<'a, TokenSecret>;
}

/// Error produced by [`TokenCipher`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CipherError {
	/// The encryption service could not produce a ciphertext.
	#[error("Encryption failed: {message}.")]
	Encrypt {
		/// Human-readable error payload.
		message: String,
	},
	/// The stored blob is corrupt or was produced under a different key.
	#[error("Decryption failed: {message}.")]
	Decrypt {
		/// Human-readable error payload.
		message: String,
	},
}

/// Reversible stand-in cipher for tests and single-node demos.
///
/// Not encryption; it merely exercises the same failure surface as a real backend
/// (undecodable blobs fail with [`CipherError::Decrypt`]).
#[derive(Clone, Copy, Debug, Default)]
pub struct Base64Cipher;
impl TokenCipher for Base64Cipher {
	fn encrypt<'a>(&'a self, plaintext: &'a str) -> CipherFuture<'a, Ciphertext> {
		Box::pin(async move { Ok(Ciphertext::new(STANDARD.encode(plaintext))) })
	}

	fn decrypt<'a>(&'a self, ciphertext: &'a Ciphertext) -> CipherFuture<'a, TokenSecret> {
		Box::pin(async move {
			let bytes = STANDARD
				.decode(ciphertext.expose())
				.map_err(|e| CipherError::Decrypt { message: e.to_string() })?;
			let value = String::from_utf8(bytes)
				.map_err(|e| CipherError::Decrypt { message: e.to_string() })?;

			Ok(TokenSecret::new(value))
		})
	}
}
