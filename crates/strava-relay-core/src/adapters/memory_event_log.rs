//! # In-Memory Event Log
//!
//! Ledger markers and dead-letter records held in memory.

use crate::dead_letter::{DeadLetterRecord, DeadLetterStore};
use crate::ledger::{EventLedger, LedgerEntry};
use crate::stores::StoreError;
use crate::{EventId, SessionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Last-completed markers per session
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLedger {
    entries: Arc<Mutex<HashMap<SessionId, LedgerEntry>>>,
}

impl InMemoryEventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn last_completed(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(session_id).cloned())
    }

    async fn record_completed(
        &self,
        session_id: &SessionId,
        entry: LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let keep_existing = matches!(
            (entries.get(session_id).and_then(|e| e.event_time), entry.event_time),
            (Some(existing), Some(incoming)) if incoming < existing
        );
        if !keep_existing {
            entries.insert(session_id.clone(), entry);
        }
        Ok(())
    }
}

/// Dead-letter records in insertion order
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterStore {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn store(&self, record: DeadLetterRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        // A replayed event that fails again replaces its previous record.
        records.retain(|existing| existing.event_id != record.event_id);
        records.push(record);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<DeadLetterRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().find(|r| &r.event_id == event_id).cloned())
    }

    async fn remove(&self, event_id: &EventId) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| &r.event_id != event_id);
        Ok(records.len() != before)
    }
}

#[cfg(test)]
#[path = "memory_event_log_tests.rs"]
mod tests;
