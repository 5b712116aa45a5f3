use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;

use crate::services::base32;
use crate::services::totp::{CODE_DIGITS, TIME_STEP_SECS};

/// シークレット長（RFC 4226 推奨の160ビット）
pub const SECRET_LEN: usize = 20;

/// 認証アプリへ渡すプロビジョニング情報
///
/// # Security
/// シークレットを返すのはセットアップ直後のこの1回のみ
#[derive(Serialize)]
pub struct ProvisioningPayload {
    /// 手入力用のBase32シークレット
    pub secret: String,
    /// QRコード化する otpauth:// URI
    pub provisioning_uri: String,
}

// URI にもシークレットが含まれるため両方伏せる
impl std::fmt::Debug for ProvisioningPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningPayload")
            .field("secret", &"******")
            .field("provisioning_uri", &"******")
            .finish()
    }
}

/// シークレット発行
#[derive(Clone)]
pub struct Provisioner {
    issuer: String,
}

impl Provisioner {
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    /// 20バイトのランダムシークレットを生成し、Base32でエンコード
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        base32::encode(&bytes)
    }

    /// 新しいシークレットとプロビジョニングURIを発行
    pub fn provision(&self, account_name: &str) -> ProvisioningPayload {
        let secret = Self::generate_secret();
        let provisioning_uri = self.provisioning_uri(account_name, &secret);
        ProvisioningPayload {
            secret,
            provisioning_uri,
        }
    }

    /// Key Uri Format に従った otpauth:// URI
    pub fn provisioning_uri(&self, account_name: &str, secret_base32: &str) -> String {
        let issuer = urlencoding::encode(&self.issuer);
        let account = urlencoding::encode(account_name);
        format!(
            "otpauth://totp/{issuer}:{account}?secret={secret_base32}&issuer={issuer}&algorithm=SHA1&digits={CODE_DIGITS}&period={TIME_STEP_SECS}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = Provisioner::generate_secret();
        // Base32エンコードされた20バイト = 32文字
        assert_eq!(secret.len(), 32);
        assert!(
            secret
                .chars()
                .all(|c| "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567".contains(c))
        );
        assert_eq!(base32::decode(&secret).len(), SECRET_LEN);
    }

    #[test]
    fn test_secrets_are_unique() {
        assert_ne!(Provisioner::generate_secret(), Provisioner::generate_secret());
    }

    #[test]
    fn test_provisioning_uri_format() {
        let provisioner = Provisioner::new("Community Admin".to_string());
        let uri = provisioner.provisioning_uri("alice@example.com", "JBSWY3DPEHPK3PXP");

        assert_eq!(
            uri,
            "otpauth://totp/Community%20Admin:alice%40example.com?secret=JBSWY3DPEHPK3PXP&issuer=Community%20Admin&algorithm=SHA1&digits=6&period=30"
        );
    }

    #[test]
    fn test_provision_embeds_secret() {
        let provisioner = Provisioner::new("TestApp".to_string());
        let payload = provisioner.provision("bob");
        assert!(
            payload
                .provisioning_uri
                .contains(&format!("secret={}", payload.secret))
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let payload = Provisioner::new("TestApp".to_string()).provision("alice@example.com");
        let debug = format!("{:?}", payload);
        assert!(!debug.contains(&payload.secret));
        assert!(!debug.contains("otpauth://"));
    }
}
