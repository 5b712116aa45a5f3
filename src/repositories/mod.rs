pub mod two_factor_credential;

pub use two_factor_credential::{CredentialStore, PgCredentialStore};
