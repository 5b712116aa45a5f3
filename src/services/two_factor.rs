use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Role, TwoFactorCredential};
use crate::repositories::CredentialStore;
use crate::services::base32;
use crate::services::gate::{self, GatePolicy, MAX_SESSION_TIMEOUT_MINS, TrustSnapshot};
use crate::services::provisioning::{Provisioner, ProvisioningPayload};
use crate::services::secret_cipher::SecretCipher;
use crate::services::totp::{CodeVerifier, TotpCode};
use crate::services::user_lock::UserLocks;

/// リクエスト元のユーザー（ID基盤が認証済み）
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    /// 認証アプリに表示するアカウント名
    pub account_name: String,
}

/// 二要素認証サービスの設定
#[derive(Debug, Clone, Copy)]
pub struct TwoFactorSettings {
    pub policy: GatePolicy,
    pub reject_replayed_codes: bool,
}

/// 二要素認証の状態遷移
///
/// 資格情報の「読み込み → コード検証 → 書き込み」はユーザー単位のロック内で行い、
/// 保存時に version を検査する。現在時刻はすべて引数で受け取る。
///
/// # Security
/// - シークレット平文・コードはログ出力禁止
#[derive(Clone)]
pub struct TwoFactorService {
    store: Arc<dyn CredentialStore>,
    cipher: SecretCipher,
    provisioner: Provisioner,
    verifier: Arc<dyn CodeVerifier>,
    locks: UserLocks,
    settings: TwoFactorSettings,
}

impl TwoFactorService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: SecretCipher,
        provisioner: Provisioner,
        verifier: Arc<dyn CodeVerifier>,
        settings: TwoFactorSettings,
    ) -> Self {
        Self {
            store,
            cipher,
            provisioner,
            verifier,
            locks: UserLocks::new(),
            settings,
        }
    }

    /// 現在の信頼状態
    pub async fn status(
        &self,
        principal: &Principal,
        now: OffsetDateTime,
    ) -> Result<TrustSnapshot, AppError> {
        let credential = self.load(principal.user_id).await?;
        Ok(self.snapshot(principal, &credential, now))
    }

    /// 特権操作の前に呼び出すゲート
    pub async fn authorize(
        &self,
        principal: &Principal,
        now: OffsetDateTime,
    ) -> Result<TrustSnapshot, AppError> {
        let snapshot = self.status(principal, now).await?;
        self.enforce(principal, &snapshot)?;
        Ok(snapshot)
    }

    /// 導出済みのスナップショットで特権操作の可否を判定
    pub fn enforce(&self, principal: &Principal, snapshot: &TrustSnapshot) -> Result<(), AppError> {
        gate::authorize(snapshot).inspect_err(|_| {
            tracing::info!(
                user_id = %principal.user_id,
                state = ?snapshot.state(),
                "特権操作を拒否"
            );
        })
    }

    /// シークレットを発行してセットアップ中として保存
    ///
    /// 既に有効な場合（ローテーション）は、現在のシークレットに対する
    /// コード確認を必須とする。
    pub async fn setup(
        &self,
        principal: &Principal,
        current_code: Option<&TotpCode>,
        now: OffsetDateTime,
    ) -> Result<(ProvisioningPayload, TrustSnapshot), AppError> {
        let payload = self.provisioner.provision(&principal.account_name);
        let staged = self.cipher.encrypt(&payload.secret)?;

        let credential = self
            .update(principal.user_id, |credential| {
                if credential.enabled {
                    let code = current_code.ok_or(AppError::TwoFactorVerificationRequired)?;
                    let counter = self.check_active(credential, code, now)?;
                    credential.mark_verified(counter, now);
                }
                // 既存のセットアップ中シークレットは上書き
                credential.stage_pending(staged, now);
                Ok(true)
            })
            .await?;

        if credential.enabled {
            tracing::info!(user_id = %principal.user_id, "2FAシークレットのローテーション開始");
        } else {
            tracing::info!(user_id = %principal.user_id, "2FA設定開始");
        }

        Ok((payload, self.snapshot(principal, &credential, now)))
    }

    /// セットアップ中のシークレットをコードで確認して有効化
    ///
    /// ローテーション時は旧シークレットを同じ書き込みで破棄する。
    pub async fn enable(
        &self,
        principal: &Principal,
        code: &TotpCode,
        now: OffsetDateTime,
    ) -> Result<TrustSnapshot, AppError> {
        let credential = self
            .update(principal.user_id, |credential| {
                let pending = credential
                    .live_pending_secret(now, self.settings.policy.provisioning_ttl)
                    .ok_or(AppError::NoPendingSecret)?;
                // 新しいシークレットなのでリプレイ検査の基準は持ち越さない
                let counter = self.check_code(pending, code, None, now)?;
                credential.activate_pending(counter, now);
                Ok(true)
            })
            .await
            .inspect_err(|e| self.log_rejection(principal, "enable", e))?;

        tracing::info!(user_id = %principal.user_id, "2FA有効化完了");

        Ok(self.snapshot(principal, &credential, now))
    }

    /// 有効なシークレットでコードを検証し、信頼ウィンドウを再開
    ///
    /// 2FA未設定の場合は何もせず、信頼済みとして扱う。
    pub async fn verify(
        &self,
        principal: &Principal,
        code: &TotpCode,
        now: OffsetDateTime,
    ) -> Result<TrustSnapshot, AppError> {
        let credential = self
            .update(principal.user_id, |credential| {
                if !credential.enabled {
                    return Ok(false);
                }
                let counter = self.check_active(credential, code, now)?;
                credential.mark_verified(counter, now);
                Ok(true)
            })
            .await
            .inspect_err(|e| self.log_rejection(principal, "verify", e))?;

        if credential.enabled {
            tracing::info!(user_id = %principal.user_id, "2FA再検証完了");
        } else {
            tracing::debug!(user_id = %principal.user_id, "2FA未設定のため検証をスキップ");
        }

        Ok(self.snapshot(principal, &credential, now))
    }

    /// 有効なシークレットでコードを確認して2FAを無効化
    pub async fn disable(
        &self,
        principal: &Principal,
        code: &TotpCode,
        now: OffsetDateTime,
    ) -> Result<TrustSnapshot, AppError> {
        let credential = self
            .update(principal.user_id, |credential| {
                if !credential.enabled {
                    return Err(AppError::NotEnabled);
                }
                self.check_active(credential, code, now)?;
                credential.reset();
                Ok(true)
            })
            .await
            .inspect_err(|e| self.log_rejection(principal, "disable", e))?;

        tracing::info!(user_id = %principal.user_id, "2FA無効化完了");

        Ok(self.snapshot(principal, &credential, now))
    }

    /// セットアップ中のシークレットを破棄（有効なシークレットはそのまま）
    pub async fn abandon_setup(
        &self,
        principal: &Principal,
        now: OffsetDateTime,
    ) -> Result<TrustSnapshot, AppError> {
        let mut abandoned = false;
        let credential = self
            .update(principal.user_id, |credential| {
                if credential.pending_secret_encrypted.is_none() {
                    return Ok(false);
                }
                credential.clear_pending();
                abandoned = true;
                Ok(true)
            })
            .await?;

        if abandoned {
            tracing::info!(user_id = %principal.user_id, "2FA設定を中止");
        } else {
            tracing::debug!(user_id = %principal.user_id, "中止するセットアップがない");
        }

        Ok(self.snapshot(principal, &credential, now))
    }

    /// サインアウト時にこのセッションの検証済みフラグを落とす
    pub async fn revoke_session(
        &self,
        principal: &Principal,
        now: OffsetDateTime,
    ) -> Result<TrustSnapshot, AppError> {
        let credential = self
            .update(principal.user_id, |credential| {
                if !credential.verified_this_session {
                    return Ok(false);
                }
                credential.verified_this_session = false;
                Ok(true)
            })
            .await?;

        tracing::info!(user_id = %principal.user_id, "2FAセッションを失効");

        Ok(self.snapshot(principal, &credential, now))
    }

    fn snapshot(
        &self,
        principal: &Principal,
        credential: &TwoFactorCredential,
        now: OffsetDateTime,
    ) -> TrustSnapshot {
        gate::evaluate(
            principal.role.is_privileged(),
            credential,
            now,
            &self.settings.policy,
        )
    }

    async fn load(&self, user_id: Uuid) -> Result<TwoFactorCredential, AppError> {
        Ok(self
            .store
            .find_by_user_id(user_id)
            .await?
            .unwrap_or_else(|| TwoFactorCredential::new(user_id)))
    }

    /// ユーザー単位のロック内で資格情報を読み込み、変更して保存
    ///
    /// `apply` が false を返した場合は保存しない。
    async fn update<F>(&self, user_id: Uuid, apply: F) -> Result<TwoFactorCredential, AppError>
    where
        F: FnOnce(&mut TwoFactorCredential) -> Result<bool, AppError> + Send,
    {
        let _guard = self.locks.lock(user_id).await;

        let mut credential = self.load(user_id).await?;
        if !apply(&mut credential)? {
            return Ok(credential);
        }

        if !self.store.save(&credential).await? {
            tracing::warn!(user_id = %user_id, "2FA資格情報の更新が競合");
            return Err(AppError::ConcurrentModification);
        }

        Ok(credential)
    }

    /// 有効なシークレットに対してコードを検証
    fn check_active(
        &self,
        credential: &TwoFactorCredential,
        code: &TotpCode,
        now: OffsetDateTime,
    ) -> Result<u64, AppError> {
        let active = credential.secret_encrypted.as_deref().ok_or_else(|| {
            tracing::error!(user_id = %credential.user_id, "有効な2FAにシークレットがない");
            AppError::Internal(anyhow::anyhow!("enabled credential without secret"))
        })?;
        self.check_code(active, code, credential.last_accepted_counter, now)
    }

    /// コードを検証し、一致したタイムステップを返す
    fn check_code(
        &self,
        secret_encrypted: &[u8],
        code: &TotpCode,
        last_accepted_counter: Option<i64>,
        now: OffsetDateTime,
    ) -> Result<u64, AppError> {
        let secret = base32::decode(&self.cipher.decrypt(secret_encrypted)?);
        let counter = self
            .verifier
            .matching_counter(&secret, unix_seconds(now), code)
            .ok_or(AppError::InvalidCode)?;

        if self.settings.reject_replayed_codes
            && last_accepted_counter.is_some_and(|last| counter as i64 <= last)
        {
            return Err(AppError::InvalidCode);
        }

        Ok(counter)
    }

    fn log_rejection(&self, principal: &Principal, operation: &str, error: &AppError) {
        if matches!(
            error,
            AppError::InvalidCode | AppError::NoPendingSecret | AppError::NotEnabled
        ) {
            tracing::warn!(
                user_id = %principal.user_id,
                operation,
                kind = error.kind(),
                "2FAコード検証に失敗"
            );
        }
    }
}

fn unix_seconds(now: OffsetDateTime) -> u64 {
    u64::try_from(now.unix_timestamp()).unwrap_or(0)
}

/// 設定値（分・秒）からゲート設定を構築
///
/// 信頼ウィンドウは `MAX_SESSION_TIMEOUT_MINS` までに丸める。
pub fn policy_from_minutes(session_timeout_mins: i64, provisioning_ttl_secs: i64) -> GatePolicy {
    GatePolicy {
        session_timeout: Duration::minutes(session_timeout_mins.clamp(1, MAX_SESSION_TIMEOUT_MINS)),
        provisioning_ttl: Duration::seconds(provisioning_ttl_secs),
    }
}
