pub mod base32;
pub mod gate;
pub mod provisioning;
pub mod secret_cipher;
pub mod totp;
pub mod trust_cache;
pub mod two_factor;
pub mod user_lock;

pub use gate::{GatePolicy, TrustSnapshot, TrustState};
pub use provisioning::{Provisioner, ProvisioningPayload};
pub use secret_cipher::SecretCipher;
pub use totp::{CodeVerifier, Rfc6238, TotpCode};
pub use trust_cache::{AdvisoryTrust, TrustCookie};
pub use two_factor::{Principal, TwoFactorService};
