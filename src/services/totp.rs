use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::{Choice, ConstantTimeEq};

use crate::error::AppError;

type HmacSha1 = Hmac<Sha1>;

/// タイムステップ（秒）
pub const TIME_STEP_SECS: u64 = 30;
/// コード桁数
pub const CODE_DIGITS: usize = 6;
/// 許容するステップ数（前後）
pub const SKEW_STEPS: u64 = 1;

/// 利用者が入力した6桁のTOTPコード
///
/// 空白を除去した後、ASCII数字ちょうど6桁であることを保証する。
#[derive(Clone, PartialEq, Eq)]
pub struct TotpCode([u8; CODE_DIGITS]);

impl TotpCode {
    /// 入力文字列をパース（暗号処理の前に形式を検証）
    pub fn parse(input: &str) -> Result<Self, AppError> {
        let mut digits = [0u8; CODE_DIGITS];
        let mut len = 0;

        for c in input.chars().filter(|c| !c.is_whitespace()) {
            if !c.is_ascii_digit() || len == CODE_DIGITS {
                return Err(AppError::MalformedCode);
            }
            digits[len] = c as u8;
            len += 1;
        }

        if len != CODE_DIGITS {
            return Err(AppError::MalformedCode);
        }

        Ok(Self(digits))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// コードはログに出さない
impl std::fmt::Debug for TotpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TotpCode(******)")
    }
}

/// TOTPコード検証のインターフェース
///
/// 状態遷移側はこのトレイトだけに依存する。
pub trait CodeVerifier: Send + Sync {
    /// 一致したタイムステップのカウンタを返す（不一致なら None）
    fn matching_counter(&self, secret: &[u8], unix_time: u64, code: &TotpCode) -> Option<u64>;

    fn verify(&self, secret: &[u8], unix_time: u64, code: &TotpCode) -> bool {
        self.matching_counter(secret, unix_time, code).is_some()
    }
}

/// HMAC-SHA1 / 30秒 / 6桁 の RFC 6238 実装
///
/// SHA1 は一般的な認証アプリとの互換性のために維持している。
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc6238;

impl CodeVerifier for Rfc6238 {
    fn matching_counter(&self, secret: &[u8], unix_time: u64, code: &TotpCode) -> Option<u64> {
        let current = counter_at(unix_time);
        let mut matched: Option<u64> = None;

        // 候補は常にすべて計算し、比較も定数時間で行う
        for counter in current.saturating_sub(SKEW_STEPS)..=current.saturating_add(SKEW_STEPS) {
            let candidate = hotp(secret, counter);
            let equal: Choice = candidate.as_bytes().ct_eq(code.as_bytes());
            if bool::from(equal) && matched.is_none() {
                matched = Some(counter);
            }
        }

        matched
    }
}

/// UNIX時刻からタイムステップのカウンタを算出
pub fn counter_at(unix_time: u64) -> u64 {
    unix_time / TIME_STEP_SECS
}

/// 指定時刻のTOTPコード
pub fn totp_at(secret: &[u8], unix_time: u64) -> String {
    hotp(secret, counter_at(unix_time))
}

/// RFC 4226 HOTP（6桁）
pub fn hotp(secret: &[u8], counter: u64) -> String {
    // HMACは任意長の鍵を受け付けるため失敗しない
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation
    let offset = (digest[19] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff;

    format!("{:0width$}", binary % 1_000_000, width = CODE_DIGITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_SECRET: &[u8] = b"12345678901234567890";

    fn code(s: &str) -> TotpCode {
        TotpCode::parse(s).unwrap()
    }

    #[test]
    fn test_rfc4226_hotp_vectors() {
        let expected = [
            "755224", "287082", "359152", "969429", "338314", "254676", "287922", "162583",
            "399871", "520489",
        ];
        for (counter, want) in expected.iter().enumerate() {
            assert_eq!(hotp(RFC_SECRET, counter as u64), *want, "counter = {}", counter);
        }
    }

    #[test]
    fn test_rfc6238_sha1_vectors() {
        // RFC 6238 Appendix B の8桁値の下6桁
        assert_eq!(totp_at(RFC_SECRET, 59), "287082");
        assert_eq!(totp_at(RFC_SECRET, 1_111_111_109), "081804");
        assert_eq!(totp_at(RFC_SECRET, 1_111_111_111), "050471");
        assert_eq!(totp_at(RFC_SECRET, 1_234_567_890), "005924");
        assert_eq!(totp_at(RFC_SECRET, 2_000_000_000), "279037");
        assert_eq!(totp_at(RFC_SECRET, 20_000_000_000), "353130");
    }

    #[test]
    fn test_tolerance_window() {
        let verifier = Rfc6238;
        let counter = 50_000_000u64;
        let valid = code(&hotp(RFC_SECRET, counter));
        let time_for = |c: u64| c * TIME_STEP_SECS + 7;

        assert!(verifier.verify(RFC_SECRET, time_for(counter - 1), &valid));
        assert!(verifier.verify(RFC_SECRET, time_for(counter), &valid));
        assert!(verifier.verify(RFC_SECRET, time_for(counter + 1), &valid));
        assert!(!verifier.verify(RFC_SECRET, time_for(counter - 2), &valid));
        assert!(!verifier.verify(RFC_SECRET, time_for(counter + 2), &valid));
    }

    #[test]
    fn test_matching_counter_reports_step() {
        let verifier = Rfc6238;
        let counter = 40_000_000u64;
        let valid = code(&hotp(RFC_SECRET, counter));
        let now = (counter + 1) * TIME_STEP_SECS;

        assert_eq!(
            verifier.matching_counter(RFC_SECRET, now, &valid),
            Some(counter)
        );
    }

    #[test]
    fn test_counter_zero_does_not_underflow() {
        let verifier = Rfc6238;
        let valid = code(&hotp(RFC_SECRET, 0));
        assert!(verifier.verify(RFC_SECRET, 0, &valid));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let verifier = Rfc6238;
        let now = 1_700_000_000;
        let valid = code(&totp_at(RFC_SECRET, now));
        assert!(!verifier.verify(b"another-secret-value!", now, &valid));
    }

    #[test]
    fn test_parse_strips_whitespace() {
        assert_eq!(code(" 123 456 ").as_bytes(), b"123456");
        assert_eq!(code("123456\n").as_bytes(), b"123456");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "12345", "1234567", "12345a", "１２３４５６", "123-456"] {
            assert!(
                matches!(TotpCode::parse(input), Err(AppError::MalformedCode)),
                "input = {:?}",
                input
            );
        }
    }

    #[test]
    fn test_debug_hides_code() {
        assert_eq!(format!("{:?}", code("123456")), "TotpCode(******)");
    }
}
