//! Durable ticket store contract with optimistic versioning.
//!
//! The store is the only cross-ticket shared state in the system, and its
//! conditional-write semantics are what enforce single-writer-per-ticket: a
//! `put` names the version it read, and the store rejects the write if the
//! stored version moved underneath it. The caller reloads and retries — a
//! concurrent update is never silently overwritten. No in-process locks are
//! needed anywhere else.
//!
//! [`MemoryTicketStore`] is the bundled implementation used by the demo
//! binary and the test suite; production deployments implement the trait
//! over whatever conditional-write database they run.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;

use triage::{Ticket, TicketId, TicketStatus};

/// Errors from the durable store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The conditional write lost a race; reload and retry.
    #[error("version conflict on ticket {0}")]
    VersionConflict(TicketId),

    #[error("ticket {0} not found")]
    NotFound(TicketId),

    #[error("ticket {0} already exists")]
    AlreadyExists(TicketId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Conditional get/put ticket storage with indexed queries.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert a brand-new ticket at version 0.
    async fn insert(&self, ticket: Ticket) -> Result<(), StoreError>;

    async fn get(&self, id: TicketId) -> Result<Ticket, StoreError>;

    /// Conditional write: succeeds only if the stored version equals
    /// `expected_version`, then bumps the version. Returns the stored copy.
    async fn put(&self, ticket: Ticket, expected_version: u64) -> Result<Ticket, StoreError>;

    async fn by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>, StoreError>;

    async fn by_customer(&self, customer_ref: &str) -> Result<Vec<Ticket>, StoreError>;
}

/// In-memory store implementing the conditional-write contract.
#[derive(Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<HashMap<TicketId, Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn insert(&self, ticket: Ticket) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().await;
        if tickets.contains_key(&ticket.id) {
            return Err(StoreError::AlreadyExists(ticket.id));
        }
        tickets.insert(ticket.id, ticket);
        Ok(())
    }

    async fn get(&self, id: TicketId) -> Result<Ticket, StoreError> {
        let tickets = self.tickets.lock().await;
        tickets.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn put(&self, mut ticket: Ticket, expected_version: u64) -> Result<Ticket, StoreError> {
        let mut tickets = self.tickets.lock().await;
        let stored = tickets
            .get(&ticket.id)
            .ok_or(StoreError::NotFound(ticket.id))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict(ticket.id));
        }
        ticket.version = expected_version + 1;
        ticket.updated_at = Utc::now();
        tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>, StoreError> {
        let tickets = self.tickets.lock().await;
        Ok(tickets
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn by_customer(&self, customer_ref: &str) -> Result<Vec<Ticket>, StoreError> {
        let tickets = self.tickets.lock().await;
        Ok(tickets
            .values()
            .filter(|t| t.customer_ref == customer_ref)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage::{Channel, TicketCreationEvent};

    fn ticket() -> Ticket {
        Ticket::from_event(TicketCreationEvent {
            channel: Channel::Email,
            customer_ref: "cust-1".to_string(),
            text: "hello".to_string(),
            attachment_refs: vec![],
        })
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryTicketStore::new();
        let t = ticket();
        let id = t.id;
        store.insert(t).await.unwrap();
        let loaded = store.get(id).await.unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryTicketStore::new();
        let t = ticket();
        store.insert(t.clone()).await.unwrap();
        assert!(matches!(
            store.insert(t).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_conditional_put_bumps_version() {
        let store = MemoryTicketStore::new();
        let t = ticket();
        let id = t.id;
        store.insert(t).await.unwrap();

        let mut loaded = store.get(id).await.unwrap();
        loaded.record("test", "first write");
        let stored = store.put(loaded, 0).await.unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let store = MemoryTicketStore::new();
        let t = ticket();
        let id = t.id;
        store.insert(t).await.unwrap();

        // Two readers load version 0.
        let a = store.get(id).await.unwrap();
        let b = store.get(id).await.unwrap();

        store.put(a, 0).await.unwrap();
        // The second writer's view is stale now.
        let err = store.put(b, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(_)));

        // Reload-and-retry succeeds.
        let fresh = store.get(id).await.unwrap();
        assert_eq!(fresh.version, 1);
        store.put(fresh, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_queries_by_status_and_customer() {
        let store = MemoryTicketStore::new();
        let t1 = ticket();
        let mut t2 = ticket();
        t2.customer_ref = "cust-2".to_string();
        store.insert(t1).await.unwrap();
        store.insert(t2).await.unwrap();

        let received = store.by_status(TicketStatus::Received).await.unwrap();
        assert_eq!(received.len(), 2);

        let mine = store.by_customer("cust-2").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].customer_ref, "cust-2");
    }
}
