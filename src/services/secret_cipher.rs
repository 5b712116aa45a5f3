use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;

use crate::error::AppError;

const NONCE_LEN: usize = 12;

/// TOTPシークレットの保存用暗号化
///
/// # Security
/// - Base32テキストをAES-256-GCMで暗号化してDB保存
/// - シークレット平文はログに出力しない
#[derive(Clone)]
pub struct SecretCipher {
    encryption_key: [u8; 32],
}

impl SecretCipher {
    /// Base64エンコードされた32バイトの鍵から作成
    pub fn new(encryption_key_base64: &str) -> Result<Self, AppError> {
        let key_bytes = STANDARD.decode(encryption_key_base64).map_err(|e| {
            tracing::error!(error = ?e, "暗号化キーのBase64デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid encryption key format"))
        })?;

        let encryption_key: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            tracing::error!(expected = 32, actual = key_bytes.len(), "暗号化キーの長さが不正");
            AppError::Internal(anyhow::anyhow!("encryption key must be 32 bytes"))
        })?;

        Ok(Self { encryption_key })
    }

    /// シークレットを暗号化
    ///
    /// # Returns
    /// 96ビットnonce (12バイト) + 暗号文
    pub fn encrypt(&self, secret_base32: &str) -> Result<Vec<u8>, AppError> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, secret_base32.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレット暗号化エラー");
            AppError::Internal(anyhow::anyhow!("encryption error"))
        })?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// 暗号化されたシークレットを復号（Base32テキストを返す）
    pub fn decrypt(&self, encrypted: &[u8]) -> Result<String, AppError> {
        if encrypted.len() < NONCE_LEN {
            tracing::error!(len = encrypted.len(), "暗号化データが短すぎる");
            return Err(AppError::Internal(anyhow::anyhow!(
                "encrypted data too short"
            )));
        }

        let cipher = self.cipher()?;
        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|e| {
            tracing::error!(error = ?e, "シークレット復号エラー");
            AppError::Internal(anyhow::anyhow!("decryption error"))
        })?;

        String::from_utf8(plaintext).map_err(|e| {
            tracing::error!(error = ?e, "復号データのUTF-8変換エラー");
            AppError::Internal(anyhow::anyhow!("invalid utf8 after decryption"))
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm, AppError> {
        Aes256Gcm::new_from_slice(&self.encryption_key).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            AppError::Internal(anyhow::anyhow!("cipher initialization error"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cipher() -> SecretCipher {
        SecretCipher::new(&STANDARD.encode([7u8; 32])).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_secret() {
        let cipher = create_test_cipher();
        let original = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

        let encrypted = cipher.encrypt(original).unwrap();
        // 12バイトnonce + 暗号文 + 16バイトtag
        assert_eq!(encrypted.len(), NONCE_LEN + original.len() + 16);

        assert_eq!(cipher.decrypt(&encrypted).unwrap(), original);
    }

    #[test]
    fn test_nonce_differs_per_encryption() {
        let cipher = create_test_cipher();
        let a = cipher.encrypt("MZXW6YTBOI").unwrap();
        let b = cipher.encrypt("MZXW6YTBOI").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let encrypted = create_test_cipher().encrypt("MZXW6YTBOI").unwrap();
        let other = SecretCipher::new(&STANDARD.encode([9u8; 32])).unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_decrypt_too_short() {
        assert!(create_test_cipher().decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_new_with_invalid_key_length() {
        let short_key = STANDARD.encode([0u8; 16]);
        assert!(SecretCipher::new(&short_key).is_err());
    }

    #[test]
    fn test_new_with_invalid_base64() {
        assert!(SecretCipher::new("not-valid-base64!!!").is_err());
    }
}
