//! 管理者信頼状態の判定（Enforcement Gate）
//!
//! 特権操作の可否はすべてここを通して判定する。
//! 判定は永続化された資格情報・ロール・現在時刻のみから導出する純粋関数で、
//! クライアント側キャッシュは一切参照しない。

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::AppError;
use crate::models::TwoFactorCredential;

/// デフォルトの信頼ウィンドウ（分）
pub const DEFAULT_SESSION_TIMEOUT_MINS: i64 = 180;
/// 信頼ウィンドウの上限（7日）
pub const MAX_SESSION_TIMEOUT_MINS: i64 = 7 * 24 * 60;

/// 信頼状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustState {
    /// 二要素認証が未設定
    NotConfigured,
    /// 設定済みだが、このセッションで未検証または期限切れ
    PendingVerification,
    /// 検証済みかつウィンドウ内
    Trusted,
    /// 信頼済みのまま新しいシークレットへの切り替え中
    Rotating,
}

impl TrustState {
    /// 特権操作を許可する状態か
    pub fn permits_privileged(self) -> bool {
        matches!(self, Self::Trusted | Self::Rotating)
    }
}

/// 判定に使う設定
#[derive(Debug, Clone, Copy)]
pub struct GatePolicy {
    pub session_timeout: Duration,
    pub provisioning_ttl: Duration,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            session_timeout: Duration::minutes(DEFAULT_SESSION_TIMEOUT_MINS),
            provisioning_ttl: Duration::minutes(10),
        }
    }
}

/// サーバー側で導出した信頼状態のスナップショット
///
/// `evaluate` でのみ生成できる。クライアントのキャッシュ（`AdvisoryTrust`）から
/// 組み立てる手段はないため、認可判定に使えるのはこの型だけ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustSnapshot {
    state: TrustState,
    enabled: bool,
    verified: bool,
    requires_verification: bool,
    session_timeout_mins: i64,
    #[serde(skip)]
    last_verification_at: Option<OffsetDateTime>,
    #[serde(skip)]
    trusted_until: Option<OffsetDateTime>,
}

impl TrustSnapshot {
    pub fn state(&self) -> TrustState {
        self.state
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn requires_verification(&self) -> bool {
        self.requires_verification
    }

    pub fn session_timeout_mins(&self) -> i64 {
        self.session_timeout_mins
    }

    pub fn last_verification_at(&self) -> Option<OffsetDateTime> {
        self.last_verification_at
    }

    /// 信頼ウィンドウの終了時刻（特権ロールで信頼済みの場合のみ）
    pub fn trusted_until(&self) -> Option<OffsetDateTime> {
        self.trusted_until
    }
}

/// 資格情報の各値から状態を分類
///
/// 入力のみに依存し、副作用はない。
pub fn classify(
    enabled: bool,
    verified_this_session: bool,
    last_verification_at: Option<OffsetDateTime>,
    rotation_staged: bool,
    now: OffsetDateTime,
    session_timeout: Duration,
) -> TrustState {
    if !enabled {
        return TrustState::NotConfigured;
    }

    let within_window = match last_verification_at {
        Some(at) if verified_this_session => now - at < session_timeout,
        _ => false,
    };

    match (within_window, rotation_staged) {
        (false, _) => TrustState::PendingVerification,
        (true, false) => TrustState::Trusted,
        (true, true) => TrustState::Rotating,
    }
}

/// ロール・資格情報・現在時刻から信頼状態を導出
///
/// 特権ロール以外は常に `Trusted`（ゲートは素通し）。
pub fn evaluate(
    privileged: bool,
    credential: &TwoFactorCredential,
    now: OffsetDateTime,
    policy: &GatePolicy,
) -> TrustSnapshot {
    let session_timeout_mins = policy.session_timeout.whole_minutes();

    if !privileged {
        return TrustSnapshot {
            state: TrustState::Trusted,
            enabled: credential.enabled,
            verified: true,
            requires_verification: false,
            session_timeout_mins,
            last_verification_at: credential.last_verification_at,
            trusted_until: None,
        };
    }

    let rotation_staged = credential.enabled
        && credential
            .live_pending_secret(now, policy.provisioning_ttl)
            .is_some();

    let state = classify(
        credential.enabled,
        credential.verified_this_session,
        credential.last_verification_at,
        rotation_staged,
        now,
        policy.session_timeout,
    );

    let trusted_until = if state.permits_privileged() {
        // 表現可能な範囲を超える場合は期限なしとして扱う
        credential
            .last_verification_at
            .and_then(|at| at.checked_add(policy.session_timeout))
    } else {
        None
    };

    TrustSnapshot {
        state,
        enabled: credential.enabled,
        verified: state.permits_privileged(),
        requires_verification: state == TrustState::PendingVerification,
        session_timeout_mins,
        last_verification_at: credential.last_verification_at,
        trusted_until,
    }
}

/// 特権操作の可否を判定
pub fn authorize(snapshot: &TrustSnapshot) -> Result<(), AppError> {
    match snapshot.state {
        TrustState::NotConfigured => Err(AppError::TwoFactorSetupRequired),
        TrustState::PendingVerification => Err(AppError::TwoFactorVerificationRequired),
        TrustState::Trusted | TrustState::Rotating => Ok(()),
    }
}
