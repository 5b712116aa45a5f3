pub mod role;
pub mod two_factor_credential;

pub use role::Role;
pub use two_factor_credential::TwoFactorCredential;
