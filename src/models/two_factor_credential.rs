use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// ユーザーの二要素認証（TOTP）資格情報
///
/// シークレットは Base32 テキストを AES-256-GCM で暗号化して保存する。
/// 平文シークレットはログに出力禁止。
///
/// # Invariants
/// - `enabled = true` なら `secret_encrypted` は Some
/// - `verified_this_session = true` なら `last_verification_at` は Some
/// - セットアップ中のシークレットは `pending_secret_encrypted` に置き、
///   有効化と同時に `secret_encrypted` と入れ替える
#[derive(Debug, Clone, FromRow)]
pub struct TwoFactorCredential {
    pub user_id: Uuid,
    pub enabled: bool,
    pub secret_encrypted: Option<Vec<u8>>,
    pub pending_secret_encrypted: Option<Vec<u8>>,
    pub pending_created_at: Option<OffsetDateTime>,
    pub verified_this_session: bool,
    pub last_verification_at: Option<OffsetDateTime>,
    /// 最後に受理したコードのタイムステップ
    pub last_accepted_counter: Option<i64>,
    /// 楽観的排他制御用（0 は未保存）
    pub version: i64,
}

impl TwoFactorCredential {
    /// 未設定状態の資格情報
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            enabled: false,
            secret_encrypted: None,
            pending_secret_encrypted: None,
            pending_created_at: None,
            verified_this_session: false,
            last_verification_at: None,
            last_accepted_counter: None,
            version: 0,
        }
    }

    /// 有効期限内のセットアップ中シークレット
    pub fn live_pending_secret(
        &self,
        now: OffsetDateTime,
        ttl: time::Duration,
    ) -> Option<&[u8]> {
        let created_at = self.pending_created_at?;
        if now - created_at >= ttl {
            return None;
        }
        self.pending_secret_encrypted.as_deref()
    }

    /// セットアップ中のシークレットを置き換える
    pub fn stage_pending(&mut self, secret_encrypted: Vec<u8>, now: OffsetDateTime) {
        self.pending_secret_encrypted = Some(secret_encrypted);
        self.pending_created_at = Some(now);
    }

    pub fn clear_pending(&mut self) {
        self.pending_secret_encrypted = None;
        self.pending_created_at = None;
    }

    /// 信頼ウィンドウを開始（または更新）
    pub fn mark_verified(&mut self, counter: u64, now: OffsetDateTime) {
        self.verified_this_session = true;
        self.last_verification_at = Some(now);
        self.last_accepted_counter = Some(counter as i64);
    }

    /// セットアップ中のシークレットを有効化し、旧シークレットを破棄
    ///
    /// 呼び出し側で pending が存在することを確認済みであること
    pub fn activate_pending(&mut self, counter: u64, now: OffsetDateTime) {
        self.secret_encrypted = self.pending_secret_encrypted.take();
        self.pending_created_at = None;
        self.enabled = self.secret_encrypted.is_some();
        self.mark_verified(counter, now);
    }

    /// すべての二要素認証情報を破棄（未設定状態へ）
    pub fn reset(&mut self) {
        self.enabled = false;
        self.secret_encrypted = None;
        self.clear_pending();
        self.verified_this_session = false;
        self.last_verification_at = None;
        self.last_accepted_counter = None;
    }
}
