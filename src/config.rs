use secrecy::SecretBox;
use serde::Deserialize;

use crate::services::gate::MAX_SESSION_TIMEOUT_MINS;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // 2FA (TOTP) 設定
    /// TOTP発行者名（認証アプリに表示される）
    pub totp_issuer: String,
    /// AES-256暗号化キー（Base64エンコード、32バイト）
    pub encryption_key: SecretBox<String>,
    /// 検証後に特権操作を許可する時間（分）
    #[serde(default = "default_session_timeout_mins")]
    pub session_timeout_mins: i64,
    /// セットアップ中シークレットの有効期間（秒）
    #[serde(default = "default_provisioning_ttl_secs")]
    pub provisioning_ttl_secs: i64,
    /// 許容ウィンドウ内での同一コードの再利用を拒否する
    #[serde(default)]
    pub reject_replayed_codes: bool,

    // 信頼キャッシュ Cookie 設定
    /// Cookie署名鍵（Base64エンコード、32バイト以上）
    pub trust_cookie_secret: SecretBox<String>,
    #[serde(default = "default_trust_cookie_secure")]
    pub trust_cookie_secure: bool,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SESSION_TIMEOUT_MINS: i64 = 180;
const DEFAULT_PROVISIONING_TTL_SECS: i64 = 600;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_session_timeout_mins() -> i64 {
    DEFAULT_SESSION_TIMEOUT_MINS
}

fn default_provisioning_ttl_secs() -> i64 {
    DEFAULT_PROVISIONING_TTL_SECS
}

fn default_trust_cookie_secure() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), envy::Error> {
        if !(1..=MAX_SESSION_TIMEOUT_MINS).contains(&self.session_timeout_mins) {
            return Err(envy::Error::Custom(format!(
                "SESSION_TIMEOUT_MINS must be between 1 and {}",
                MAX_SESSION_TIMEOUT_MINS
            )));
        }
        if self.provisioning_ttl_secs <= 0 {
            return Err(envy::Error::Custom(
                "PROVISIONING_TTL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
