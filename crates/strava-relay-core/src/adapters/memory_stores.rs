//! # In-Memory Stores
//!
//! Thread-safe in-memory identity, credential and activity stores.

use crate::stores::{
    ActivityRecord, ActivityStore, CredentialStore, IdentityStore, StoreError, UpsertOutcome,
};
use crate::{ExternalObjectId, ExternalOwnerId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use strava_client::TokenSet;

// A panicking writer cannot leave these maps half-updated, so poisoning is ignored.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Identity
// ============================================================================

/// Athlete-to-user links held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    links: Arc<RwLock<HashMap<ExternalOwnerId, UserId>>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a Strava athlete to a local user, replacing any previous link.
    pub fn link(&self, owner_id: ExternalOwnerId, user_id: UserId) {
        write(&self.links).insert(owner_id, user_id);
    }

    pub fn unlink(&self, owner_id: &ExternalOwnerId) -> bool {
        write(&self.links).remove(owner_id).is_some()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn resolve_user(&self, owner_id: &ExternalOwnerId) -> Result<Option<UserId>, StoreError> {
        Ok(read(&self.links).get(owner_id).cloned())
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Per-user Strava tokens held in memory
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    tokens: Arc<RwLock<HashMap<UserId, TokenSet>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: UserId, tokens: TokenSet) {
        write(&self.tokens).insert(user_id, tokens);
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        read(&self.tokens).contains_key(user_id)
    }
}

impl std::fmt::Debug for InMemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCredentialStore")
            .field("users", &read(&self.tokens).len())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_tokens(&self, user_id: &UserId) -> Result<Option<TokenSet>, StoreError> {
        Ok(read(&self.tokens).get(user_id).cloned())
    }

    async fn save_tokens(&self, user_id: &UserId, tokens: TokenSet) -> Result<(), StoreError> {
        write(&self.tokens).insert(user_id.clone(), tokens);
        Ok(())
    }

    async fn revoke(&self, user_id: &UserId) -> Result<bool, StoreError> {
        Ok(write(&self.tokens).remove(user_id).is_some())
    }
}

// ============================================================================
// Activities
// ============================================================================

type ActivityKey = (UserId, ExternalObjectId);

/// Activity records held in memory, keyed by `(user_id, activity_id)`
#[derive(Debug, Clone, Default)]
pub struct InMemoryActivityStore {
    records: Arc<RwLock<HashMap<ActivityKey, ActivityRecord>>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records belonging to one user, ordered by activity id.
    pub fn records_for(&self, user_id: &UserId) -> Vec<ActivityRecord> {
        let mut records: Vec<_> = read(&self.records)
            .values()
            .filter(|record| &record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.activity_id.cmp(&b.activity_id));
        records
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn upsert(&self, record: ActivityRecord) -> Result<UpsertOutcome, StoreError> {
        let key = (record.user_id.clone(), record.activity_id.clone());
        let previous = write(&self.records).insert(key, record);

        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn delete(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<bool, StoreError> {
        let key = (user_id.clone(), activity_id.clone());
        Ok(write(&self.records).remove(&key).is_some())
    }

    async fn get(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<Option<ActivityRecord>, StoreError> {
        let key = (user_id.clone(), activity_id.clone());
        Ok(read(&self.records).get(&key).cloned())
    }
}

#[cfg(test)]
#[path = "memory_stores_tests.rs"]
mod tests;
