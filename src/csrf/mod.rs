//! Cross-site request forgery protection.
//!
//! Tokens are issued per session key and must be echoed back on unsafe
//! requests. A token stays valid until it expires or is revoked.

mod policy;
mod session_key;
mod store;
mod token;

pub use policy::CsrfPolicy;
pub use session_key::SessionKey;
pub use store::{CsrfTokenRecord, CsrfTokenStore};
pub use token::{generate_token, tokens_match};
