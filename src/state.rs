use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::CredentialStore;
use crate::services::two_factor::{TwoFactorSettings, policy_from_minutes};
use crate::services::{Provisioner, Rfc6238, SecretCipher, TrustCookie, TwoFactorService};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// 二要素認証サービス
    pub two_factor: TwoFactorService,
    /// 信頼キャッシュ Cookie
    pub trust_cookie: TrustCookie,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(store: Arc<dyn CredentialStore>, config: Config) -> Result<Self, AppError> {
        let config = Arc::new(config);

        let cipher = SecretCipher::new(config.encryption_key.expose_secret())?;
        let settings = TwoFactorSettings {
            policy: policy_from_minutes(config.session_timeout_mins, config.provisioning_ttl_secs),
            reject_replayed_codes: config.reject_replayed_codes,
        };
        if settings.reject_replayed_codes {
            tracing::info!("コード再利用の拒否を有効化");
        }

        let two_factor = TwoFactorService::new(
            store,
            cipher,
            Provisioner::new(config.totp_issuer.clone()),
            Arc::new(Rfc6238),
            settings,
        );

        let trust_cookie = TrustCookie::new(
            config.trust_cookie_secret.expose_secret(),
            config.trust_cookie_secure,
        )?;

        Ok(Self {
            config,
            two_factor,
            trust_cookie,
        })
    }
}
