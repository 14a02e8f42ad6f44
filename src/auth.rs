//! Auth-domain identifiers, secret wrappers, and the account credential model.

pub mod id;
pub mod record;
pub mod secret;

pub use id::*;
pub use record::*;
pub use secret::*;
