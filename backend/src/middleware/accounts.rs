//! Account status checks for authenticated requests
//!
//! A token stays valid until it expires, so each request also confirms that
//! the account behind it still exists and is active. Answers are reused for a
//! short while; deactivating or deleting an account evicts its entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppResult;

/// How long a status answer is reused before the database is asked again
pub const ACCOUNT_STATUS_TTL: Duration = Duration::from_secs(30);

/// Expired entries are swept once the map grows past this size
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountKey {
    Staff { lab_id: Uuid, user_id: Uuid },
    Portal { lab_id: Uuid, portal_user_id: Uuid },
}

impl AccountKey {
    pub fn staff(lab_id: Uuid, user_id: Uuid) -> Self {
        AccountKey::Staff { lab_id, user_id }
    }

    pub fn portal(lab_id: Uuid, portal_user_id: Uuid) -> Self {
        AccountKey::Portal {
            lab_id,
            portal_user_id,
        }
    }
}

#[derive(Debug)]
pub struct AccountStatusCache {
    ttl: Duration,
    entries: RwLock<HashMap<AccountKey, (bool, Instant)>>,
}

impl Default for AccountStatusCache {
    fn default() -> Self {
        Self::new(ACCOUNT_STATUS_TTL)
    }
}

impl AccountStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the account may still use its session. Missing accounts
    /// count as inactive; a portal account also needs an active customer.
    pub async fn is_active(&self, db: &PgPool, key: AccountKey) -> AppResult<bool> {
        if let Some(active) = self.cached(key).await {
            return Ok(active);
        }

        let active = match key {
            AccountKey::Staff { lab_id, user_id } => {
                sqlx::query_scalar::<_, bool>("SELECT is_active FROM users WHERE id = $1 AND lab_id = $2")
                    .bind(user_id)
                    .bind(lab_id)
                    .fetch_optional(db)
                    .await?
            }
            AccountKey::Portal {
                lab_id,
                portal_user_id,
            } => {
                sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT p.is_active AND c.is_active
                    FROM portal_users p
                    JOIN customers c ON c.id = p.customer_id
                    WHERE p.id = $1 AND p.lab_id = $2
                    "#,
                )
                .bind(portal_user_id)
                .bind(lab_id)
                .fetch_optional(db)
                .await?
            }
        }
        .unwrap_or(false);

        if !active {
            tracing::debug!(?key, "session of inactive account refused");
        }
        self.remember(key, active).await;
        Ok(active)
    }

    async fn cached(&self, key: AccountKey) -> Option<bool> {
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .filter(|(_, checked_at)| checked_at.elapsed() < self.ttl)
            .map(|(active, _)| *active)
    }

    pub async fn remember(&self, key: AccountKey, active: bool) {
        let mut entries = self.entries.write().await;
        if entries.len() >= SWEEP_THRESHOLD {
            let ttl = self.ttl;
            entries.retain(|_, (_, checked_at)| checked_at.elapsed() < ttl);
        }
        entries.insert(key, (active, Instant::now()));
    }

    /// Drop the cached answer so the next request asks the database
    pub async fn forget(&self, key: AccountKey) {
        self.entries.write().await.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remembered_status_is_reused() {
        let cache = AccountStatusCache::default();
        let key = AccountKey::staff(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(cache.cached(key).await, None);

        cache.remember(key, false).await;
        assert_eq!(cache.cached(key).await, Some(false));

        cache.forget(key).await;
        assert_eq!(cache.cached(key).await, None);
    }

    #[tokio::test]
    async fn test_expired_status_is_not_reused() {
        let cache = AccountStatusCache::new(Duration::ZERO);
        let key = AccountKey::portal(Uuid::new_v4(), Uuid::new_v4());
        cache.remember(key, true).await;
        assert_eq!(cache.cached(key).await, None);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_lab() {
        let cache = AccountStatusCache::default();
        let user_id = Uuid::new_v4();
        cache.remember(AccountKey::staff(Uuid::new_v4(), user_id), true).await;
        assert_eq!(cache.cached(AccountKey::staff(Uuid::new_v4(), user_id)).await, None);
    }
}
