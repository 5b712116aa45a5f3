use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("認証されていません")]
    Unauthenticated,

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),

    #[error("認証コードの形式が不正です")]
    MalformedCode,

    #[error("認証コードが無効です")]
    InvalidCode,

    #[error("セットアップ中のシークレットがありません")]
    NoPendingSecret,

    #[error("二要素認証が有効化されていません")]
    NotEnabled,

    #[error("二要素認証の設定が必要です")]
    TwoFactorSetupRequired,

    #[error("二要素認証の再検証が必要です")]
    TwoFactorVerificationRequired,

    #[error("同時更新が競合しました")]
    ConcurrentModification,
}

impl AppError {
    /// クライアント向けの機械可読なエラー種別
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Database(_) | Self::Internal(_) => "internal",
            Self::MalformedCode => "malformed_code",
            Self::InvalidCode => "invalid_code",
            Self::NoPendingSecret => "no_pending_secret",
            Self::NotEnabled => "not_enabled",
            Self::TwoFactorSetupRequired => "two_factor_setup_required",
            Self::TwoFactorVerificationRequired => "two_factor_verification_required",
            Self::ConcurrentModification => "concurrent_modification",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "認証が必要です".to_string()),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::MalformedCode => (
                StatusCode::BAD_REQUEST,
                "認証コードは6桁の数字で入力してください".to_string(),
            ),
            // 失敗理由は明かさない
            Self::InvalidCode => (
                StatusCode::UNAUTHORIZED,
                "認証コードが正しくありません".to_string(),
            ),
            Self::NoPendingSecret => (
                StatusCode::CONFLICT,
                "セットアップからやり直してください".to_string(),
            ),
            Self::NotEnabled => (
                StatusCode::BAD_REQUEST,
                "二要素認証が有効化されていません".to_string(),
            ),
            Self::TwoFactorSetupRequired => (
                StatusCode::FORBIDDEN,
                "二要素認証の設定が必要です".to_string(),
            ),
            Self::TwoFactorVerificationRequired => (
                StatusCode::FORBIDDEN,
                "二要素認証の再検証が必要です".to_string(),
            ),
            Self::ConcurrentModification => (
                StatusCode::CONFLICT,
                "他の操作と競合しました。再度お試しください".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                kind: self.kind(),
            }),
        )
            .into_response()
    }
}
