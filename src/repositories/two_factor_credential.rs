use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TwoFactorCredential;

/// 二要素認証資格情報の永続化
///
/// `save` は楽観的排他制御を行い、読み込み後に他の書き込みがあった場合は
/// false を返す（呼び出し側で競合として扱う）。
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// ユーザーIDで資格情報を検索
    async fn find_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TwoFactorCredential>, sqlx::Error>;

    /// 資格情報を保存
    ///
    /// # Returns
    /// 保存できた場合 true、version 不一致の場合 false
    async fn save(&self, credential: &TwoFactorCredential) -> Result<bool, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TwoFactorCredential>, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorCredential>(
            r#"
            SELECT user_id, enabled, secret_encrypted, pending_secret_encrypted,
                   pending_created_at, verified_this_session, last_verification_at,
                   last_accepted_counter, version
            FROM user_2fa_credentials
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn save(&self, credential: &TwoFactorCredential) -> Result<bool, sqlx::Error> {
        // version = 0 は未保存（INSERT）、それ以外は version 一致時のみ UPDATE
        let result = if credential.version == 0 {
            sqlx::query(
                r#"
                INSERT INTO user_2fa_credentials (
                    user_id, enabled, secret_encrypted, pending_secret_encrypted,
                    pending_created_at, verified_this_session, last_verification_at,
                    last_accepted_counter, version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
                ON CONFLICT (user_id) DO NOTHING
                "#,
            )
            .bind(credential.user_id)
            .bind(credential.enabled)
            .bind(credential.secret_encrypted.as_deref())
            .bind(credential.pending_secret_encrypted.as_deref())
            .bind(credential.pending_created_at)
            .bind(credential.verified_this_session)
            .bind(credential.last_verification_at)
            .bind(credential.last_accepted_counter)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE user_2fa_credentials
                SET enabled = $2,
                    secret_encrypted = $3,
                    pending_secret_encrypted = $4,
                    pending_created_at = $5,
                    verified_this_session = $6,
                    last_verification_at = $7,
                    last_accepted_counter = $8,
                    version = version + 1,
                    updated_at = NOW()
                WHERE user_id = $1 AND version = $9
                "#,
            )
            .bind(credential.user_id)
            .bind(credential.enabled)
            .bind(credential.secret_encrypted.as_deref())
            .bind(credential.pending_secret_encrypted.as_deref())
            .bind(credential.pending_created_at)
            .bind(credential.verified_this_session)
            .bind(credential.last_verification_at)
            .bind(credential.last_accepted_counter)
            .bind(credential.version)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// テスト用のインメモリ実装
    #[derive(Clone, Default)]
    pub struct InMemoryCredentialStore {
        rows: Arc<Mutex<HashMap<Uuid, TwoFactorCredential>>>,
    }

    impl InMemoryCredentialStore {
        /// 保存済みの行を直接書き換える（競合の再現用）
        pub fn tamper(&self, user_id: Uuid, f: impl FnOnce(&mut TwoFactorCredential)) {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.get_mut(&user_id) {
                f(row);
                row.version += 1;
            }
        }
    }

    #[async_trait]
    impl CredentialStore for InMemoryCredentialStore {
        async fn find_by_user_id(
            &self,
            user_id: Uuid,
        ) -> Result<Option<TwoFactorCredential>, sqlx::Error> {
            Ok(self.rows.lock().unwrap().get(&user_id).cloned())
        }

        async fn save(&self, credential: &TwoFactorCredential) -> Result<bool, sqlx::Error> {
            let mut rows = self.rows.lock().unwrap();
            let current_version = rows.get(&credential.user_id).map_or(0, |row| row.version);
            if current_version != credential.version {
                return Ok(false);
            }

            let mut stored = credential.clone();
            stored.version += 1;
            rows.insert(credential.user_id, stored);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_save_checks_version() {
        let store = InMemoryCredentialStore::default();
        let user_id = Uuid::new_v4();
        let credential = TwoFactorCredential::new(user_id);

        assert!(store.save(&credential).await.unwrap());
        // 同じ version（古い読み込み）での再保存は競合
        assert!(!store.save(&credential).await.unwrap());

        let loaded = store.find_by_user_id(user_id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert!(store.save(&loaded).await.unwrap());
    }
}
