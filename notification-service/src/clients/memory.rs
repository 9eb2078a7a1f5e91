use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    clients::database::NotificationStore,
    models::{notification::NotificationRecord, status::NotificationStatus},
};

/// Process-local store used when no database URL is configured.
#[derive(Default)]
pub struct InMemoryNotificationStore {
    records: RwLock<HashMap<Uuid, NotificationRecord>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn select<P>(&self, predicate: P) -> Vec<NotificationRecord>
    where
        P: Fn(&NotificationRecord) -> bool,
    {
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, record: &NotificationRecord) -> Result<Uuid, Error> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(anyhow!("Notification {} already exists", record.id));
        }
        records.insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, Error> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn find_latest_by_user_and_statuses(
        &self,
        user_id: i64,
        statuses: &[NotificationStatus],
    ) -> Result<Option<NotificationRecord>, Error> {
        Ok(self
            .select(|r| r.user_id == user_id && statuses.contains(&r.status))
            .into_iter()
            .next())
    }

    async fn update(&self, record: &NotificationRecord) -> Result<(), Error> {
        let mut records = self.records.write();
        match records.get_mut(&record.id) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(anyhow!("Notification {} not found", record.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        Ok(self.records.write().remove(&id).is_some())
    }

    async fn count_by_status(&self, status: NotificationStatus) -> Result<u64, Error> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.status == status)
            .count() as u64)
    }

    async fn status_counts(&self) -> Result<HashMap<NotificationStatus, u64>, Error> {
        let mut counts = HashMap::new();
        for record in self.records.read().values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find_retryable(&self, max_retries: u32) -> Result<Vec<NotificationRecord>, Error> {
        let mut records = self.select(|r| match r.status {
            NotificationStatus::Pending => true,
            NotificationStatus::Failed => r.retry_count < max_retries,
            _ => false,
        });
        records.reverse();
        Ok(records)
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<NotificationRecord>, Error> {
        Ok(self.select(|r| r.user_id == user_id))
    }

    async fn find_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<NotificationRecord>, Error> {
        Ok(self.select(|r| r.status == status))
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
