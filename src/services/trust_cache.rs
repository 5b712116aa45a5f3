//! クライアント側信頼キャッシュ（Cookie）
//!
//! サーバーが導出した `TrustSnapshot` を署名付きで Cookie に写す一方向のミラー。
//! クライアントが再検証プロンプトを先回りして出すためだけに使い、
//! サーバー側の認可判定には使わない。

use axum::http::{HeaderMap, header};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::AppError;
use crate::services::gate::{TrustSnapshot, TrustState};

type HmacSha256 = Hmac<Sha256>;

/// Cookie 名
pub const TRUST_COOKIE_NAME: &str = "admin_trust";

const MIN_KEY_LEN: usize = 32;

/// Cookie から読み出した信頼状態（参考値）
///
/// `TrustSnapshot` とは別の型で、`gate::authorize` には渡せない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryTrust {
    pub state: TrustState,
    pub enabled: bool,
    pub verified: bool,
    pub requires_verification: bool,
    pub session_timeout_mins: i64,
    /// 失効時刻（UNIX秒）
    pub expires_at: i64,
}

impl AdvisoryTrust {
    /// 特権操作の前に再検証プロンプトを出すべきか
    pub fn should_prompt(&self) -> bool {
        self.requires_verification || self.state == TrustState::NotConfigured
    }
}

/// 信頼キャッシュ Cookie の発行と読み出し
#[derive(Clone)]
pub struct TrustCookie {
    signing_key: Vec<u8>,
    secure: bool,
}

impl TrustCookie {
    /// Base64エンコードされた署名鍵（32バイト以上）から作成
    pub fn new(signing_key_base64: &str, secure: bool) -> Result<Self, AppError> {
        let signing_key = STANDARD.decode(signing_key_base64).map_err(|e| {
            tracing::error!(error = ?e, "Cookie署名鍵のBase64デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid trust cookie key format"))
        })?;

        if signing_key.len() < MIN_KEY_LEN {
            tracing::error!(
                expected = MIN_KEY_LEN,
                actual = signing_key.len(),
                "Cookie署名鍵が短すぎる"
            );
            return Err(AppError::Internal(anyhow::anyhow!(
                "trust cookie key must be at least 32 bytes"
            )));
        }

        Ok(Self {
            signing_key,
            secure,
        })
    }

    /// Cookie の Max-Age（秒）
    ///
    /// セッションタイムアウトを上限とし、信頼済みなら残りウィンドウ以内に収める。
    pub fn max_age_secs(snapshot: &TrustSnapshot, now: OffsetDateTime) -> i64 {
        let timeout_secs = snapshot.session_timeout_mins().saturating_mul(60);
        match snapshot.trusted_until() {
            Some(until) => (until - now).whole_seconds().clamp(0, timeout_secs),
            None => timeout_secs,
        }
    }

    /// スナップショットを署名付きトークンにエンコード
    ///
    /// 形式: `base64url(json).base64url(hmac_sha256)`
    pub fn encode(
        &self,
        snapshot: &TrustSnapshot,
        now: OffsetDateTime,
    ) -> Result<String, AppError> {
        let advisory = AdvisoryTrust {
            state: snapshot.state(),
            enabled: snapshot.enabled(),
            verified: snapshot.verified(),
            requires_verification: snapshot.requires_verification(),
            session_timeout_mins: snapshot.session_timeout_mins(),
            expires_at: now
                .unix_timestamp()
                .saturating_add(Self::max_age_secs(snapshot, now)),
        };

        let json = serde_json::to_vec(&advisory).map_err(|e| {
            tracing::error!(error = ?e, "信頼キャッシュのシリアライズエラー");
            AppError::Internal(anyhow::anyhow!("trust cache serialization error"))
        })?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(payload.as_bytes())?.finalize().into_bytes();
        let signature = URL_SAFE_NO_PAD.encode(signature);

        Ok(format!("{}.{}", payload, signature))
    }

    /// トークンを検証して読み出す
    ///
    /// 署名不一致・形式不正・期限切れはすべて None
    pub fn decode(&self, token: &str, now: OffsetDateTime) -> Option<AdvisoryTrust> {
        let (payload, signature) = token.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        self.sign(payload.as_bytes()).ok()?.verify_slice(&signature).ok()?;

        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let advisory: AdvisoryTrust = serde_json::from_slice(&json).ok()?;

        (advisory.expires_at > now.unix_timestamp()).then_some(advisory)
    }

    /// Set-Cookie ヘッダー値を構築
    ///
    /// クライアントのスクリプトから読めるよう HttpOnly は付けない。
    pub fn set_cookie(
        &self,
        snapshot: &TrustSnapshot,
        now: OffsetDateTime,
    ) -> Result<String, AppError> {
        let token = self.encode(snapshot, now)?;
        let mut cookie = format!(
            "{}={}; SameSite=Lax; Path=/; Max-Age={}",
            TRUST_COOKIE_NAME,
            token,
            Self::max_age_secs(snapshot, now)
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        Ok(cookie)
    }

    /// リクエストの Cookie ヘッダーから読み出す
    pub fn from_headers(&self, headers: &HeaderMap, now: OffsetDateTime) -> Option<AdvisoryTrust> {
        let token = extract_cookie(headers, TRUST_COOKIE_NAME)?;
        self.decode(&token, now)
    }

    fn sign(&self, payload: &[u8]) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key).map_err(|e| {
            tracing::error!(error = ?e, "HMAC初期化エラー");
            AppError::Internal(anyhow::anyhow!("hmac initialization error"))
        })?;
        mac.update(payload);
        Ok(mac)
    }
}

/// Cookie ヘッダーから値を取り出す
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
}
