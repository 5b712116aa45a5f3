use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// ID基盤から渡されるユーザーロール
///
/// 二要素認証ゲートの対象かどうかは `is_privileged` だけで判定する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Editor,
    Moderator,
    Admin,
    SuperAdmin,
}

impl Role {
    /// 管理者系ロールのみ true
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "editor" => Ok(Self::Editor),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}
