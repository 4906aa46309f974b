use super::{
    apply_patch, ChangeEvent, ConfigSource, Gateway, Subscribers, Subscription, SubscriptionId,
};
use crate::error::{PledgeError, Result};
use crate::member::MemberId;
use crate::wire::MemberRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An in-process gateway with the same write and event semantics as
/// [`SqliteGateway`](super::SqliteGateway).
///
/// Fetches and writes can be made to fail on demand, which makes this the
/// backend of choice for offline runs and tests.
#[derive(Default)]
pub struct MemoryGateway {
    rows: Mutex<Vec<MemberRecord>>,
    config: Mutex<HashMap<String, String>>,
    subscribers: Subscribers,
    fail_fetch: AtomicBool,
    /// `None` means unlimited; `Some(n)` lets `n` more writes succeed.
    write_budget: Mutex<Option<usize>>,
    upsert_sizes: Mutex<Vec<usize>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given rows already stored.
    pub fn with_records(records: Vec<MemberRecord>) -> Self {
        let gateway = Self::default();
        *lock(&gateway.rows) = records;
        gateway
    }

    pub fn set_config(&self, key: &str, value: &str) {
        lock(&self.config).insert(key.to_string(), value.to_string());
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail (`true`) or succeed (`false`).
    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.write_budget) = if fail { Some(0) } else { None };
    }

    /// Let the next `n` writes succeed, then fail the rest.
    pub fn fail_writes_after(&self, n: usize) {
        *lock(&self.write_budget) = Some(n);
    }

    /// Batch sizes of every successful `upsert` call so far.
    pub fn upsert_sizes(&self) -> Vec<usize> {
        lock(&self.upsert_sizes).clone()
    }

    pub fn records(&self) -> Vec<MemberRecord> {
        lock(&self.rows).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn take_write(&self) -> Result<()> {
        let mut budget = lock(&self.write_budget);
        match budget.as_mut() {
            None => Ok(()),
            Some(0) => Err(PledgeError::Gateway("Simulated write failure".into())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }
}

impl Gateway for MemoryGateway {
    fn fetch_all(&self) -> Result<Vec<MemberRecord>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(PledgeError::Gateway("Simulated connection failure".into()));
        }
        let mut rows = lock(&self.rows).clone();
        rows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(rows)
    }

    fn upsert(&self, records: &[MemberRecord]) -> Result<()> {
        self.take_write()?;

        let mut events = Vec::with_capacity(records.len());
        {
            let mut rows = lock(&self.rows);
            for record in records {
                match rows.iter_mut().find(|r| r.id == record.id) {
                    Some(existing) => {
                        *existing = record.clone();
                        events.push(ChangeEvent::Update(record.clone()));
                    }
                    None => {
                        rows.push(record.clone());
                        events.push(ChangeEvent::Insert(record.clone()));
                    }
                }
            }
        }
        lock(&self.upsert_sizes).push(records.len());
        self.subscribers.publish(events);
        Ok(())
    }

    fn update_fields(&self, id: MemberId, fields: &serde_json::Value) -> Result<()> {
        self.take_write()?;

        let updated = {
            let mut rows = lock(&self.rows);
            let existing = rows
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(PledgeError::NotFound { id })?;
            *existing = apply_patch(existing, fields)?;
            existing.clone()
        };
        self.subscribers.publish(vec![ChangeEvent::Update(updated)]);
        Ok(())
    }

    fn delete(&self, id: MemberId) -> Result<()> {
        self.take_write()?;

        let removed = {
            let mut rows = lock(&self.rows);
            let before = rows.len();
            rows.retain(|r| r.id != id);
            rows.len() != before
        };
        if removed {
            self.subscribers.publish(vec![ChangeEvent::Delete { id }]);
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription> {
        Ok(self.subscribers.subscribe())
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }
}

impl ConfigSource for MemoryGateway {
    fn config_value(&self, key: &str) -> Result<Option<String>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(PledgeError::Gateway("Simulated connection failure".into()));
        }
        Ok(lock(&self.config).get(key).cloned())
    }
}
