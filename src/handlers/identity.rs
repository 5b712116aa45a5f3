use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Role;
use crate::services::Principal;

/// 認証済みユーザーIDを渡すヘッダー（前段のID基盤が付与）
pub const USER_ID_HEADER: &str = "x-user-id";
/// ユーザーロールを渡すヘッダー
pub const USER_ROLE_HEADER: &str = "x-user-role";
/// 認証アプリに表示するアカウント名（任意）
pub const USER_NAME_HEADER: &str = "x-user-name";

/// リクエスト元ユーザーの抽出
///
/// ヘッダーが欠けている・不正な場合は 401
pub struct CurrentUser(pub Principal);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id: Uuid = header_value(parts, USER_ID_HEADER)
            .and_then(|value| value.parse().ok())
            .ok_or(AppError::Unauthenticated)?;

        let role: Role = header_value(parts, USER_ROLE_HEADER)
            .ok_or(AppError::Unauthenticated)?
            .parse()
            .map_err(|e| {
                tracing::warn!(user_id = %user_id, error = %e, "不明なロール");
                AppError::Unauthenticated
            })?;

        let account_name = header_value(parts, USER_NAME_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| user_id.to_string());

        Ok(Self(Principal {
            user_id,
            role,
            account_name,
        }))
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
