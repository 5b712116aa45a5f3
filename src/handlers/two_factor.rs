use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::handlers::identity::CurrentUser;
use crate::services::{TotpCode, TrustSnapshot};
use crate::state::AppState;

/// 信頼キャッシュ Cookie を書き換えるレスポンスヘッダー
fn trust_cookie_header(
    state: &AppState,
    snapshot: &TrustSnapshot,
    now: OffsetDateTime,
) -> Result<[(header::HeaderName, String); 1], AppError> {
    let cookie = state.trust_cookie.set_cookie(snapshot, now)?;
    Ok([(header::SET_COOKIE, cookie)])
}

// === 2FA Setup ===

#[derive(Debug, Default, Deserialize)]
pub struct SetupRequest {
    /// 有効化済みの場合（ローテーション）のみ必須：現在のシークレットのコード
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub secret: String,
    pub provisioning_uri: String,
}

/// POST /api/2fa/setup
///
/// 2FA設定を開始（シークレット生成、プロビジョニングURI返却）
///
/// # Security
/// - シークレット平文はログ出力禁止
pub async fn setup_2fa(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    request: Option<Json<SetupRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let current_code = request.code.as_deref().map(TotpCode::parse).transpose()?;

    let now = OffsetDateTime::now_utc();
    let (payload, snapshot) = state
        .two_factor
        .setup(&principal, current_code.as_ref(), now)
        .await?;

    Ok((
        trust_cookie_header(&state, &snapshot, now)?,
        Json(SetupResponse {
            secret: payload.secret,
            provisioning_uri: payload.provisioning_uri,
        }),
    ))
}

/// DELETE /api/2fa/setup
///
/// セットアップ中のシークレットを破棄
pub async fn abandon_2fa_setup(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let now = OffsetDateTime::now_utc();
    let snapshot = state.two_factor.abandon_setup(&principal, now).await?;

    Ok((trust_cookie_header(&state, &snapshot, now)?, Json(snapshot)))
}

// === 2FA Enable / Verify / Disable ===

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct EnableResponse {
    pub enabled: bool,
}

/// POST /api/2fa/enable
///
/// 初回コード検証で有効化
///
/// # Security
/// - コードはログ出力禁止
pub async fn enable_2fa(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(request): Json<CodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = TotpCode::parse(&request.code)?;

    let now = OffsetDateTime::now_utc();
    let snapshot = state.two_factor.enable(&principal, &code, now).await?;

    Ok((
        trust_cookie_header(&state, &snapshot, now)?,
        Json(EnableResponse { enabled: true }),
    ))
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_verification_at: Option<OffsetDateTime>,
}

/// POST /api/2fa/verify
///
/// 信頼ウィンドウを再開（2FA未設定の場合は検証不要として成功）
pub async fn verify_2fa(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(request): Json<CodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = TotpCode::parse(&request.code)?;

    let now = OffsetDateTime::now_utc();
    let snapshot = state.two_factor.verify(&principal, &code, now).await?;

    let last_verification_at = if snapshot.enabled() {
        snapshot.last_verification_at()
    } else {
        None
    };

    Ok((
        trust_cookie_header(&state, &snapshot, now)?,
        Json(VerifyResponse {
            verified: true,
            last_verification_at,
        }),
    ))
}

/// POST /api/2fa/disable
///
/// # Security
/// - 現在のシークレットに対するコード確認必須
pub async fn disable_2fa(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(request): Json<CodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = TotpCode::parse(&request.code)?;

    let now = OffsetDateTime::now_utc();
    let snapshot = state.two_factor.disable(&principal, &code, now).await?;

    Ok((
        trust_cookie_header(&state, &snapshot, now)?,
        Json(EnableResponse { enabled: false }),
    ))
}

// === Status / Session ===

/// GET /api/2fa/status
///
/// サーバー側の状態から導出し直し、Cookie を常に書き換える
pub async fn status_2fa(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = OffsetDateTime::now_utc();
    let snapshot = state.two_factor.status(&principal, now).await?;

    // Cookie はずれの検出にのみ使う
    if let Some(cached) = state.trust_cookie.from_headers(&headers, now) {
        if cached.state != snapshot.state() {
            tracing::debug!(
                user_id = %principal.user_id,
                cached = ?cached.state,
                actual = ?snapshot.state(),
                "信頼キャッシュとサーバー状態の不一致"
            );
        }
    }

    Ok((trust_cookie_header(&state, &snapshot, now)?, Json(snapshot)))
}

/// POST /api/2fa/session/revoke
///
/// サインアウト時に呼び出し、検証済み状態を破棄
pub async fn revoke_2fa_session(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let now = OffsetDateTime::now_utc();
    let snapshot = state.two_factor.revoke_session(&principal, now).await?;

    Ok((trust_cookie_header(&state, &snapshot, now)?, Json(snapshot)))
}
