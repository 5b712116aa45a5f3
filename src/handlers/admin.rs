use axum::{
    Extension, Json,
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::handlers::identity::CurrentUser;
use crate::services::TrustSnapshot;
use crate::state::AppState;

/// 特権ルートの前段で信頼状態を判定するミドルウェア
///
/// Cookie の内容は参照せず、毎回サーバー側の状態から判定する。
/// 判定結果は拒否時も含めて Cookie に書き戻す。
/// 通過時は `TrustSnapshot` をリクエスト拡張に格納する。
pub async fn require_admin_trust(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let now = OffsetDateTime::now_utc();
    let snapshot = state.two_factor.status(&principal, now).await?;
    let cookie = state.trust_cookie.set_cookie(&snapshot, now)?;

    if let Err(e) = state.two_factor.enforce(&principal, &snapshot) {
        return Ok(([(header::SET_COOKIE, cookie)], e).into_response());
    }

    request.extensions_mut().insert(snapshot);

    let mut response = next.run(request).await;
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => {
            tracing::warn!(error = ?e, "信頼キャッシュ Cookie の付与に失敗");
        }
    }

    Ok(response)
}

/// GET /api/admin/trust-check
///
/// ゲートを通過した場合の信頼状態を返す
pub async fn trust_check(Extension(snapshot): Extension<TrustSnapshot>) -> Json<TrustSnapshot> {
    Json(snapshot)
}
