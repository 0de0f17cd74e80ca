pub mod auth;
pub mod limit;

pub use auth::{CredentialMaterial, KeyStore};
pub use limit::RateLimiter;
