//! PostgreSQL Store
//!
//! `sqlx` implementation of the store traits. Compound operations run inside a
//! transaction and use conditional `UPDATE ... RETURNING` so only one
//! concurrent caller can match the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{
    AuditStore, OneTimeTokenStore, SessionStore, StoreError, StoreResult, UserStore,
};
use crate::models::{
    audit::AuditLogRow, one_time_token::OneTimeTokenRow, AuditLogEntry, NewAuditEntry,
    NewOneTimeToken, NewSession, OneTimeToken, Role, Session, TokenPurpose, UserWithPassword,
};

const USER_COLUMNS: &str =
    "id, email, password_hash, is_active, is_email_verified, role_id, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, refresh_token_hash, ip, user_agent, \
     device_fingerprint, created_at, updated_at, revoked_at";

const TOKEN_COLUMNS: &str = "id, user_id, token, purpose, expires_at, used";

/// Store backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

async fn insert_session<'e, E>(executor: E, session: NewSession, now: DateTime<Utc>) -> StoreResult<Session>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!(
        "INSERT INTO sessions (user_id, refresh_token_hash, ip, user_agent, device_fingerprint, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $6) \
         RETURNING {}",
        SESSION_COLUMNS
    );
    let session = sqlx::query_as::<_, Session>(&query)
        .bind(session.user_id)
        .bind(session.refresh_token_hash)
        .bind(session.ip)
        .bind(session.user_agent)
        .bind(session.device_fingerprint)
        .bind(now)
        .fetch_one(executor)
        .await?;
    Ok(session)
}

/// Mark a token used if it is unused, unexpired and matches `purpose`
async fn claim_token<'e, E>(
    executor: E,
    token: &str,
    purpose: TokenPurpose,
    now: DateTime<Utc>,
) -> StoreResult<Option<OneTimeToken>>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!(
        "UPDATE one_time_tokens SET used = TRUE \
         WHERE token = $1 AND purpose = $2 AND used = FALSE AND expires_at >= $3 \
         RETURNING {}",
        TOKEN_COLUMNS
    );
    let row = sqlx::query_as::<_, OneTimeTokenRow>(&query)
        .bind(token)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(executor)
        .await?;

    row.map(OneTimeToken::try_from)
        .transpose()
        .map_err(StoreError::Corrupt)
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> StoreResult<UserWithPassword> {
        let query = format!(
            "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, UserWithPassword>(&query)
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("email {} already exists", email))
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn get_user(&self, user_id: i64) -> StoreResult<Option<UserWithPassword>> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, UserWithPassword>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, UserWithPassword>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
                .bind(user_id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_email_verified = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        sqlx::query_as::<_, Role>("INSERT INTO roles (name) VALUES ($1) RETURNING id, name")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("role {} already exists", name))
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn assign_role(&self, user_id: i64, role_id: Option<i64>) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET role_id = $2, updated_at = NOW() WHERE id = $1")
                .bind(user_id)
                .bind(role_id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    if is_foreign_key_violation(&e) {
                        StoreError::NotFound(format!("role {:?}", role_id))
                    } else {
                        StoreError::Database(e)
                    }
                })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, session: NewSession) -> StoreResult<Session> {
        insert_session(&self.pool, session, Utc::now()).await
    }

    async fn get_session(&self, session_id: i64) -> StoreResult<Option<Session>> {
        let query = format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS);
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn list_sessions(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        let query = format!(
            "SELECT {} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
            SESSION_COLUMNS
        );
        let sessions = sqlx::query_as::<_, Session>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    async fn revoke_session(
        &self,
        user_id: i64,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        // COALESCE keeps the first revocation time on repeated calls
        let result = sqlx::query(
            "UPDATE sessions \
             SET revoked_at = COALESCE(revoked_at, $3), updated_at = $3 \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rotate_session(
        &self,
        user_id: i64,
        old_session_id: i64,
        successor: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let mut tx = self.pool.begin().await?;

        let revoked: Option<i64> = sqlx::query_scalar(
            "UPDATE sessions SET revoked_at = $3, updated_at = $3 \
             WHERE id = $1 AND user_id = $2 AND revoked_at IS NULL \
             RETURNING id",
        )
        .bind(old_session_id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if revoked.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let session = insert_session(&mut *tx, successor, now).await?;
        tx.commit().await?;
        Ok(Some(session))
    }
}

#[async_trait]
impl OneTimeTokenStore for PgStore {
    async fn create_token(&self, token: NewOneTimeToken) -> StoreResult<OneTimeToken> {
        let query = format!(
            "INSERT INTO one_time_tokens (user_id, token, purpose, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            TOKEN_COLUMNS
        );
        let row = sqlx::query_as::<_, OneTimeTokenRow>(&query)
            .bind(token.user_id)
            .bind(&token.token)
            .bind(token.purpose.as_str())
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict("duplicate one-time token".to_string())
                } else {
                    StoreError::Database(e)
                }
            })?;

        OneTimeToken::try_from(row).map_err(StoreError::Corrupt)
    }

    async fn consume_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>> {
        claim_token(&self.pool, token, purpose, now).await
    }

    async fn consume_token_and_verify_email(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>> {
        let mut tx = self.pool.begin().await?;

        let Some(consumed) = claim_token(&mut *tx, token, TokenPurpose::VerifyEmail, now).await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE users SET is_email_verified = TRUE, updated_at = $2 WHERE id = $1",
        )
        .bind(consumed.user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("user {}", consumed.user_id)));
        }

        tx.commit().await?;
        Ok(Some(consumed))
    }

    async fn consume_token_and_set_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>> {
        let mut tx = self.pool.begin().await?;

        let Some(consumed) =
            claim_token(&mut *tx, token, TokenPurpose::ResetPassword, now).await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
                .bind(consumed.user_id)
                .bind(password_hash)
                .bind(now)
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("user {}", consumed.user_id)));
        }

        tx.commit().await?;
        Ok(Some(consumed))
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let row = sqlx::query_as::<_, AuditLogRow>(
            "INSERT INTO audit_logs (user_id, action, ip, user_agent) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, action, ip, user_agent, created_at",
        )
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.ip)
        .bind(entry.user_agent)
        .fetch_one(&self.pool)
        .await?;

        AuditLogEntry::try_from(row).map_err(StoreError::Corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use chrono::Duration;

    fn new_session(user_id: i64) -> NewSession {
        NewSession {
            user_id,
            refresh_token_hash: "hash".to_string(),
            ip: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            device_fingerprint: "fp".to_string(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_create_user_conflict(pool: PgPool) {
        let store = PgStore::new(pool);
        store.create_user("a@example.com", "h").await.unwrap();

        let result = store.create_user("a@example.com", "h").await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_rotate_session_single_use(pool: PgPool) {
        let store = PgStore::new(pool);
        let user = store.create_user("a@example.com", "h").await.unwrap();
        let session = store.create_session(new_session(user.id)).await.unwrap();
        let now = Utc::now();

        let successor = store
            .rotate_session(user.id, session.id, new_session(user.id), now)
            .await
            .unwrap();
        assert!(successor.is_some());

        let replay = store
            .rotate_session(user.id, session.id, new_session(user.id), now)
            .await
            .unwrap();
        assert!(replay.is_none());
        assert_eq!(store.list_sessions(user.id).await.unwrap().len(), 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_consume_token_once(pool: PgPool) {
        let store = PgStore::new(pool);
        let user = store.create_user("a@example.com", "h").await.unwrap();
        let now = Utc::now();
        store
            .create_token(NewOneTimeToken {
                user_id: user.id,
                token: "tok".to_string(),
                purpose: TokenPurpose::ResetPassword,
                expires_at: now + Duration::hours(2),
            })
            .await
            .unwrap();

        assert!(store
            .consume_token("tok", TokenPurpose::ResetPassword, now)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .consume_token("tok", TokenPurpose::ResetPassword, now)
            .await
            .unwrap()
            .is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_consume_and_set_password_in_one_transaction(pool: PgPool) {
        let store = PgStore::new(pool);
        let user = store.create_user("a@example.com", "old-hash").await.unwrap();
        let now = Utc::now();
        store
            .create_token(NewOneTimeToken {
                user_id: user.id,
                token: "reset".to_string(),
                purpose: TokenPurpose::ResetPassword,
                expires_at: now + Duration::hours(2),
            })
            .await
            .unwrap();

        assert!(store
            .consume_token_and_verify_email("reset", now)
            .await
            .unwrap()
            .is_none());

        let consumed = store
            .consume_token_and_set_password("reset", "new-hash", now)
            .await
            .unwrap()
            .unwrap();
        assert!(consumed.used);

        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.password_hash, "new-hash");
        assert!(!user.is_email_verified);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_assign_role(pool: PgPool) {
        let store = PgStore::new(pool);
        let user = store.create_user("a@example.com", "h").await.unwrap();
        let role = store.create_role("admin").await.unwrap();

        assert!(matches!(
            store.create_role("admin").await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.find_role_by_name("admin").await.unwrap(), Some(role.clone()));

        store.assign_role(user.id, Some(role.id)).await.unwrap();
        assert_eq!(
            store.get_user(user.id).await.unwrap().unwrap().role_id,
            Some(role.id)
        );
        assert!(matches!(
            store.assign_role(user.id, Some(role.id + 100)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_append_audit(pool: PgPool) {
        let store = PgStore::new(pool);
        let entry = store
            .append_audit(NewAuditEntry::new(AuditAction::Register))
            .await
            .unwrap();
        assert_eq!(entry.action, AuditAction::Register);
        assert!(entry.user_id.is_none());
    }
}
