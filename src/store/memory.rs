//! In-Memory Store
//!
//! Arena of entities keyed by id with secondary indexes on the unique columns.
//! A single async mutex guards the whole arena, so every trait method,
//! including the compound rotate and consume operations, runs as one
//! critical section.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    AuditStore, OneTimeTokenStore, SessionStore, StoreError, StoreResult, UserStore,
};
use crate::models::{
    AuditLogEntry, NewAuditEntry, NewOneTimeToken, NewSession, OneTimeToken, Role, Session,
    TokenPurpose, UserWithPassword,
};

#[derive(Default)]
struct Arena {
    users: BTreeMap<i64, UserWithPassword>,
    users_by_email: HashMap<String, i64>,
    roles: BTreeMap<i64, Role>,
    roles_by_name: HashMap<String, i64>,
    sessions: BTreeMap<i64, Session>,
    tokens: BTreeMap<i64, OneTimeToken>,
    tokens_by_value: HashMap<String, i64>,
    audit_log: Vec<AuditLogEntry>,
    next_user_id: i64,
    next_role_id: i64,
    next_session_id: i64,
    next_token_id: i64,
    next_audit_id: i64,
}

impl Arena {
    fn insert_session(&mut self, new: NewSession, now: DateTime<Utc>) -> Session {
        self.next_session_id += 1;
        let session = Session {
            id: self.next_session_id,
            user_id: new.user_id,
            refresh_token_hash: new.refresh_token_hash,
            ip: new.ip,
            user_agent: new.user_agent,
            device_fingerprint: new.device_fingerprint,
            created_at: now,
            updated_at: now,
            revoked_at: None,
        };
        self.sessions.insert(session.id, session.clone());
        session
    }

    fn user_mut(&mut self, user_id: i64) -> StoreResult<&mut UserWithPassword> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))
    }

    /// Record id and owner of `token` if it can be consumed for `purpose` at `now`
    fn consumable_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Option<(i64, i64)> {
        let id = self.tokens_by_value.get(token)?;
        self.tokens
            .get(id)
            .filter(|record| record.purpose == purpose && record.is_consumable_at(now))
            .map(|record| (record.id, record.user_id))
    }

    fn mark_token_used(&mut self, id: i64) -> Option<OneTimeToken> {
        self.tokens.get_mut(&id).map(|record| {
            record.used = true;
            record.clone()
        })
    }

    /// Consume a token and apply `update` to its owner. The token stays unused
    /// when the owner is missing.
    fn consume_with<F>(
        &mut self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
        update: F,
    ) -> StoreResult<Option<OneTimeToken>>
    where
        F: FnOnce(&mut UserWithPassword),
    {
        let Some((id, user_id)) = self.consumable_token(token, purpose, now) else {
            return Ok(None);
        };

        let user = self.user_mut(user_id)?;
        update(user);
        user.updated_at = now;

        Ok(self.mark_token_used(id))
    }
}

/// Process-local store, used for tests and single-node development
#[derive(Default)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit trail, oldest first
    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.arena.lock().await.audit_log.clone()
    }

    /// Snapshot of every one-time token ever issued
    pub async fn one_time_tokens(&self) -> Vec<OneTimeToken> {
        self.arena.lock().await.tokens.values().cloned().collect()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> StoreResult<UserWithPassword> {
        let mut arena = self.arena.lock().await;
        if arena.users_by_email.contains_key(email) {
            return Err(StoreError::Conflict(format!("email {} already exists", email)));
        }

        arena.next_user_id += 1;
        let now = Utc::now();
        let user = UserWithPassword {
            id: arena.next_user_id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_active: true,
            is_email_verified: false,
            role_id: None,
            created_at: now,
            updated_at: now,
        };
        arena.users_by_email.insert(user.email.clone(), user.id);
        arena.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> StoreResult<Option<UserWithPassword>> {
        Ok(self.arena.lock().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>> {
        let arena = self.arena.lock().await;
        Ok(arena
            .users_by_email
            .get(email)
            .and_then(|id| arena.users.get(id))
            .cloned())
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let mut arena = self.arena.lock().await;
        let user = arena.user_mut(user_id)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()> {
        let mut arena = self.arena.lock().await;
        let user = arena.user_mut(user_id)?;
        user.is_email_verified = true;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        let mut arena = self.arena.lock().await;
        if arena.roles_by_name.contains_key(name) {
            return Err(StoreError::Conflict(format!("role {} already exists", name)));
        }

        arena.next_role_id += 1;
        let role = Role {
            id: arena.next_role_id,
            name: name.to_string(),
        };
        arena.roles_by_name.insert(role.name.clone(), role.id);
        arena.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let arena = self.arena.lock().await;
        Ok(arena
            .roles_by_name
            .get(name)
            .and_then(|id| arena.roles.get(id))
            .cloned())
    }

    async fn assign_role(&self, user_id: i64, role_id: Option<i64>) -> StoreResult<()> {
        let mut arena = self.arena.lock().await;
        if let Some(role_id) = role_id {
            if !arena.roles.contains_key(&role_id) {
                return Err(StoreError::NotFound(format!("role {}", role_id)));
            }
        }
        let user = arena.user_mut(user_id)?;
        user.role_id = role_id;
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: NewSession) -> StoreResult<Session> {
        let mut arena = self.arena.lock().await;
        if !arena.users.contains_key(&session.user_id) {
            return Err(StoreError::NotFound(format!("user {}", session.user_id)));
        }
        Ok(arena.insert_session(session, Utc::now()))
    }

    async fn get_session(&self, session_id: i64) -> StoreResult<Option<Session>> {
        Ok(self.arena.lock().await.sessions.get(&session_id).cloned())
    }

    async fn list_sessions(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        let arena = self.arena.lock().await;
        let mut sessions: Vec<Session> = arena
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn revoke_session(
        &self,
        user_id: i64,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut arena = self.arena.lock().await;
        match arena.sessions.get_mut(&session_id) {
            Some(session) if session.user_id == user_id => {
                if session.revoked_at.is_none() {
                    session.revoked_at = Some(now);
                    session.updated_at = now;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_session(
        &self,
        user_id: i64,
        old_session_id: i64,
        successor: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let mut arena = self.arena.lock().await;
        match arena.sessions.get_mut(&old_session_id) {
            Some(old) if old.user_id == user_id && old.revoked_at.is_none() => {
                old.revoked_at = Some(now);
                old.updated_at = now;
            }
            _ => return Ok(None),
        }
        Ok(Some(arena.insert_session(successor, now)))
    }
}

#[async_trait]
impl OneTimeTokenStore for MemoryStore {
    async fn create_token(&self, token: NewOneTimeToken) -> StoreResult<OneTimeToken> {
        let mut arena = self.arena.lock().await;
        if arena.tokens_by_value.contains_key(&token.token) {
            return Err(StoreError::Conflict("duplicate one-time token".to_string()));
        }
        if !arena.users.contains_key(&token.user_id) {
            return Err(StoreError::NotFound(format!("user {}", token.user_id)));
        }

        arena.next_token_id += 1;
        let record = OneTimeToken {
            id: arena.next_token_id,
            user_id: token.user_id,
            token: token.token,
            purpose: token.purpose,
            expires_at: token.expires_at,
            used: false,
        };
        arena.tokens_by_value.insert(record.token.clone(), record.id);
        arena.tokens.insert(record.id, record.clone());
        Ok(record)
    }

    async fn consume_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>> {
        let mut arena = self.arena.lock().await;
        let Some((id, _)) = arena.consumable_token(token, purpose, now) else {
            return Ok(None);
        };
        Ok(arena.mark_token_used(id))
    }

    async fn consume_token_and_verify_email(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>> {
        self.arena
            .lock()
            .await
            .consume_with(token, TokenPurpose::VerifyEmail, now, |user| {
                user.is_email_verified = true;
            })
    }

    async fn consume_token_and_set_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>> {
        self.arena
            .lock()
            .await
            .consume_with(token, TokenPurpose::ResetPassword, now, |user| {
                user.password_hash = password_hash.to_string();
            })
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let mut arena = self.arena.lock().await;
        arena.next_audit_id += 1;
        let record = AuditLogEntry {
            id: arena.next_audit_id,
            user_id: entry.user_id,
            action: entry.action,
            ip: entry.ip,
            user_agent: entry.user_agent,
            created_at: Utc::now(),
        };
        arena.audit_log.push(record.clone());
        Ok(record)
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

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store.create_user("a@example.com", "h").await.unwrap();

        let result = store.create_user("a@example.com", "h2").await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_user_updates_require_existing_user() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();

        store.update_password(user.id, "h2").await.unwrap();
        store.mark_email_verified(user.id).await.unwrap();
        let stored = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "h2");
        assert!(stored.is_email_verified);

        assert!(matches!(
            store.update_password(999, "h").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.mark_email_verified(999).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();
        let other = store.create_user("b@example.com", "h").await.unwrap();

        let first = store.create_session(new_session(user.id)).await.unwrap();
        let second = store.create_session(new_session(user.id)).await.unwrap();
        store.create_session(new_session(other.id)).await.unwrap();

        let sessions = store.list_sessions(user.id).await.unwrap();
        let ids: Vec<i64> = sessions.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_rotate_requires_active_owned_session() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();
        let other = store.create_user("b@example.com", "h").await.unwrap();
        let session = store.create_session(new_session(user.id)).await.unwrap();
        let now = Utc::now();

        let wrong_owner = store
            .rotate_session(other.id, session.id, new_session(other.id), now)
            .await
            .unwrap();
        assert!(wrong_owner.is_none());
        assert!(store.get_session(session.id).await.unwrap().unwrap().is_active());

        let successor = store
            .rotate_session(user.id, session.id, new_session(user.id), now)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(successor.id, session.id);
        assert!(successor.is_active());
        assert_eq!(
            store.get_session(session.id).await.unwrap().unwrap().revoked_at,
            Some(now)
        );

        let replay = store
            .rotate_session(user.id, session.id, new_session(user.id), now)
            .await
            .unwrap();
        assert!(replay.is_none());
    }

    #[tokio::test]
    async fn test_revoke_session_is_idempotent() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();
        let session = store.create_session(new_session(user.id)).await.unwrap();
        let first = Utc::now();

        assert!(store.revoke_session(user.id, session.id, first).await.unwrap());
        assert!(store
            .revoke_session(user.id, session.id, first + Duration::seconds(5))
            .await
            .unwrap());
        assert_eq!(
            store.get_session(session.id).await.unwrap().unwrap().revoked_at,
            Some(first)
        );

        assert!(!store.revoke_session(user.id + 1, session.id, first).await.unwrap());
        assert!(!store.revoke_session(user.id, 999, first).await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_token_checks_purpose_and_expiry() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();
        let now = Utc::now();

        store
            .create_token(NewOneTimeToken {
                user_id: user.id,
                token: "verify-me".to_string(),
                purpose: TokenPurpose::VerifyEmail,
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();

        let wrong_purpose = store
            .consume_token("verify-me", TokenPurpose::ResetPassword, now)
            .await
            .unwrap();
        assert!(wrong_purpose.is_none());

        let too_late = store
            .consume_token("verify-me", TokenPurpose::VerifyEmail, now + Duration::hours(2))
            .await
            .unwrap();
        assert!(too_late.is_none());

        let consumed = store
            .consume_token("verify-me", TokenPurpose::VerifyEmail, now)
            .await
            .unwrap()
            .unwrap();
        assert!(consumed.used);

        let again = store
            .consume_token("verify-me", TokenPurpose::VerifyEmail, now)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    async fn issue_token(store: &MemoryStore, user_id: i64, token: &str, purpose: TokenPurpose) {
        store
            .create_token(NewOneTimeToken {
                user_id,
                token: token.to_string(),
                purpose,
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_consume_and_verify_email_updates_both() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();
        issue_token(&store, user.id, "verify-me", TokenPurpose::VerifyEmail).await;
        let now = Utc::now();

        let consumed = store
            .consume_token_and_verify_email("verify-me", now)
            .await
            .unwrap()
            .unwrap();
        assert!(consumed.used);
        assert_eq!(consumed.user_id, user.id);

        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert!(user.is_email_verified);
        assert_eq!(user.updated_at, now);

        assert!(store
            .consume_token_and_verify_email("verify-me", now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_consume_and_set_password_checks_purpose() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "old-hash").await.unwrap();
        issue_token(&store, user.id, "verify-me", TokenPurpose::VerifyEmail).await;
        issue_token(&store, user.id, "reset-me", TokenPurpose::ResetPassword).await;
        let now = Utc::now();

        let wrong_purpose = store
            .consume_token_and_set_password("verify-me", "new-hash", now)
            .await
            .unwrap();
        assert!(wrong_purpose.is_none());
        assert_eq!(
            store.get_user(user.id).await.unwrap().unwrap().password_hash,
            "old-hash"
        );

        store
            .consume_token_and_set_password("reset-me", "new-hash", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.get_user(user.id).await.unwrap().unwrap().password_hash,
            "new-hash"
        );
    }

    #[tokio::test]
    async fn test_token_stays_unused_when_owner_missing() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();
        issue_token(&store, user.id, "orphan", TokenPurpose::ResetPassword).await;
        store.arena.lock().await.users.remove(&user.id);

        let result = store
            .consume_token_and_set_password("orphan", "new-hash", Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let tokens = store.one_time_tokens().await;
        assert_eq!(tokens.len(), 1);
        assert!(!tokens[0].used);
    }

    #[tokio::test]
    async fn test_roles_are_unique_and_assignable() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com", "h").await.unwrap();

        let admin = store.create_role("admin").await.unwrap();
        assert!(matches!(
            store.create_role("admin").await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.find_role_by_name("admin").await.unwrap(), Some(admin.clone()));
        assert_eq!(store.find_role_by_name("support").await.unwrap(), None);

        store.assign_role(user.id, Some(admin.id)).await.unwrap();
        assert_eq!(
            store.get_user(user.id).await.unwrap().unwrap().role_id,
            Some(admin.id)
        );

        assert!(matches!(
            store.assign_role(user.id, Some(admin.id + 1)).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.assign_role(user.id + 1, Some(admin.id)).await,
            Err(StoreError::NotFound(_))
        ));

        store.assign_role(user.id, None).await.unwrap();
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().role_id, None);
    }

    #[tokio::test]
    async fn test_audit_is_append_only_log() {
        let store = MemoryStore::new();
        store
            .append_audit(NewAuditEntry::new(AuditAction::Login).with_user_id(1))
            .await
            .unwrap();
        store
            .append_audit(NewAuditEntry::new(AuditAction::Logout))
            .await
            .unwrap();

        let entries = store.audit_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Login);
        assert_eq!(entries[1].user_id, None);
    }
}
