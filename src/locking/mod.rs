use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::{ToolError, ToolResult};

/// Lock acquisition order contract: callers acquire locks in ascending
/// resource-type order (index < repository < file < session) and never hold
/// an exclusive lock while waiting on a lower-ordered one. The manager does
/// not enforce this; it is how deadlock is avoided by construction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Index,
    Repository,
    File,
    Session,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Read,
    Write,
    Exclusive,
}

#[derive(Serialize, Clone, Debug)]
pub struct Lock {
    pub id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub mode: LockMode,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct Waiter {
    seq: u64,
    mode: LockMode,
    owner: String,
    tx: oneshot::Sender<Lock>,
}

/// Per-resource lock state: any number of readers, at most one writer, at
/// most one exclusive holder, and a FIFO queue of waiters.
#[derive(Default)]
struct ResourceLock {
    readers: Vec<Lock>,
    writer: Option<Lock>,
    exclusive: Option<Lock>,
    queue: VecDeque<Waiter>,
}

impl ResourceLock {
    fn is_idle(&self) -> bool {
        self.readers.is_empty()
            && self.writer.is_none()
            && self.exclusive.is_none()
            && self.queue.is_empty()
    }

    /// The compatibility matrix. Readers share; a writer excludes everything
    /// but existing readers exclude it too; exclusive excludes all.
    fn compatible(&self, mode: LockMode) -> bool {
        if self.exclusive.is_some() {
            return false;
        }
        match mode {
            LockMode::Read => self.writer.is_none(),
            LockMode::Write => self.writer.is_none() && self.readers.is_empty(),
            LockMode::Exclusive => {
                self.writer.is_none() && self.readers.is_empty() && self.exclusive.is_none()
            }
        }
    }

    fn install(&mut self, lock: Lock) {
        match lock.mode {
            LockMode::Read => self.readers.push(lock),
            LockMode::Write => self.writer = Some(lock),
            LockMode::Exclusive => self.exclusive = Some(lock),
        }
    }

    fn remove(&mut self, lock_id: &str) -> bool {
        if let Some(pos) = self.readers.iter().position(|l| l.id == lock_id) {
            self.readers.remove(pos);
            return true;
        }
        if self.writer.as_ref().map(|l| l.id == lock_id).unwrap_or(false) {
            self.writer = None;
            return true;
        }
        if self
            .exclusive
            .as_ref()
            .map(|l| l.id == lock_id)
            .unwrap_or(false)
        {
            self.exclusive = None;
            return true;
        }
        false
    }
}

type ResourceKey = (ResourceType, String);

#[derive(Default)]
struct LockTable {
    resources: HashMap<ResourceKey, ResourceLock>,
    by_id: HashMap<String, ResourceKey>,
    next_seq: u64,
}

/// Read/write/exclusive locks on named resources with FIFO wait queues,
/// acquisition timeouts, cancellation and hard expiry.
pub struct LockManager {
    table: Mutex<LockTable>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            ttl,
        }
    }

    /// Try to take the lock immediately; otherwise join the FIFO queue and
    /// wait until granted, the timeout elapses, or the caller is cancelled.
    /// Timed-out and cancelled waiters are silently dropped from the queue.
    pub async fn acquire(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        mode: LockMode,
        owner: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ToolResult<Lock> {
        let key: ResourceKey = (resource_type, resource_id.to_owned());
        let (seq, rx) = {
            let mut table = self.table.lock().await;
            let resource = table.resources.entry(key.clone()).or_default();

            // fairness: jump the queue only when nobody is already waiting
            if resource.queue.is_empty() && resource.compatible(mode) {
                let lock = self.make_lock(resource_type, resource_id, mode, owner);
                resource.install(lock.clone());
                table.by_id.insert(lock.id.clone(), key);
                trace!(?resource_type, resource_id, ?mode, owner, "lock granted immediately");
                return Ok(lock);
            }

            let (tx, rx) = oneshot::channel();
            table.next_seq += 1;
            let seq = table.next_seq;
            table
                .resources
                .get_mut(&key)
                .expect("entry inserted above")
                .queue
                .push_back(Waiter {
                    seq,
                    mode,
                    owner: owner.to_owned(),
                    tx,
                });
            (seq, rx)
        };

        let mut rx = rx;
        let outcome = tokio::select! {
            // grants win ties against timeout/cancellation
            biased;
            granted = &mut rx => match granted {
                Ok(lock) => return Ok(lock),
                // the manager dropped the waiter (shutdown)
                Err(_) => return Err(ToolError::internal("lock waiter dropped")),
            },
            _ = tokio::time::sleep(timeout) => ToolError::timeout(format!(
                "timed out waiting for {mode:?} lock on {resource_id}"
            )),
            _ = cancel.cancelled() => ToolError::cancelled(format!(
                "cancelled while waiting for {mode:?} lock on {resource_id}"
            )),
        };

        self.abandon_waiter(&key, seq).await;
        // a grant may still have raced in before the waiter was removed;
        // hand it straight back instead of leaking it until expiry
        if let Ok(lock) = rx.try_recv() {
            let _ = self.release(&lock.id).await;
        }
        Err(outcome)
    }

    /// Release a granted lock and advance the queue.
    pub async fn release(&self, lock_id: &str) -> ToolResult<()> {
        let mut table = self.table.lock().await;
        let key = match table.by_id.remove(lock_id) {
            Some(key) => key,
            None => return Err(ToolError::not_found(format!("lock {lock_id} not held"))),
        };
        if let Some(resource) = table.resources.get_mut(&key) {
            resource.remove(lock_id);
        }
        Self::pump_queue(&mut table, &key, self.ttl);
        if table
            .resources
            .get(&key)
            .map(ResourceLock::is_idle)
            .unwrap_or(false)
        {
            table.resources.remove(&key);
        }
        Ok(())
    }

    /// Release every lock held by an owner (connection teardown, shutdown).
    pub async fn release_owner(&self, owner: &str) {
        let mut table = self.table.lock().await;
        let ids: Vec<String> = table
            .by_id
            .iter()
            .filter_map(|(id, key)| {
                let resource = table.resources.get(key)?;
                let held = resource.readers.iter().any(|l| l.id == *id && l.owner_id == owner)
                    || resource
                        .writer
                        .as_ref()
                        .map(|l| l.id == *id && l.owner_id == owner)
                        .unwrap_or(false)
                    || resource
                        .exclusive
                        .as_ref()
                        .map(|l| l.id == *id && l.owner_id == owner)
                        .unwrap_or(false);
                held.then(|| id.clone())
            })
            .collect();
        for id in ids {
            if let Some(key) = table.by_id.remove(&id) {
                if let Some(resource) = table.resources.get_mut(&key) {
                    resource.remove(&id);
                }
                Self::pump_queue(&mut table, &key, self.ttl);
            }
        }
    }

    /// Drop expired locks and advance the queues they were blocking. Run
    /// periodically by the background sweeper.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut table = self.table.lock().await;
        let mut expired: Vec<(String, ResourceKey)> = Vec::new();
        for (key, resource) in &table.resources {
            for lock in resource
                .readers
                .iter()
                .chain(resource.writer.iter())
                .chain(resource.exclusive.iter())
            {
                if lock.expires_at <= now {
                    expired.push((lock.id.clone(), key.clone()));
                }
            }
        }
        for (id, key) in &expired {
            warn!(lock_id = %id, resource = ?key, "releasing expired lock");
            table.by_id.remove(id);
            if let Some(resource) = table.resources.get_mut(key) {
                resource.remove(id);
            }
            Self::pump_queue(&mut table, key, self.ttl);
        }
        table.resources.retain(|_, resource| !resource.is_idle());
        expired.len()
    }

    /// Spawn the expiry sweeper; stops when the token is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let released = manager.sweep_expired().await;
                        if released > 0 {
                            debug!(released, "lock sweeper released expired locks");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    /// Grant queued waiters in order, stopping at the first one whose mode
    /// is incompatible with the current holders.
    fn pump_queue(table: &mut LockTable, key: &ResourceKey, ttl: Duration) {
        loop {
            let resource = match table.resources.get_mut(key) {
                Some(resource) => resource,
                None => return,
            };
            let front_mode = match resource.queue.front() {
                Some(waiter) => waiter.mode,
                None => return,
            };
            if !resource.compatible(front_mode) {
                return;
            }
            let waiter = resource.queue.pop_front().expect("front checked above");
            let lock = Lock {
                id: uuid::Uuid::new_v4().to_string(),
                resource_type: key.0,
                resource_id: key.1.clone(),
                mode: waiter.mode,
                owner_id: waiter.owner.clone(),
                acquired_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300)),
            };
            resource.install(lock.clone());
            table.by_id.insert(lock.id.clone(), key.clone());
            if let Err(lock) = waiter.tx.send(lock) {
                // receiver raced away (timeout/cancel); take the grant back
                let id = lock.id.clone();
                table.by_id.remove(&id);
                if let Some(resource) = table.resources.get_mut(key) {
                    resource.remove(&id);
                }
                continue;
            }
        }
    }

    async fn abandon_waiter(&self, key: &ResourceKey, seq: u64) {
        let mut table = self.table.lock().await;
        if let Some(resource) = table.resources.get_mut(key) {
            resource.queue.retain(|waiter| waiter.seq != seq);
        }
        Self::pump_queue(&mut table, key, self.ttl);
    }

    fn make_lock(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        mode: LockMode,
        owner: &str,
    ) -> Lock {
        Lock {
            id: uuid::Uuid::new_v4().to_string(),
            resource_type,
            resource_id: resource_id.to_owned(),
            mode,
            owner_id: owner.to_owned(),
            acquired_at: Utc::now(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    /// Current holder count, for stats and tests.
    pub async fn held_locks(&self) -> usize {
        self.table.lock().await.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(Duration::from_secs(300)))
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn readers_share_writers_exclude() {
        let locks = manager();
        let r1 = locks
            .acquire(ResourceType::Repository, "r", LockMode::Read, "a", WAIT, &token())
            .await
            .unwrap();
        let _r2 = locks
            .acquire(ResourceType::Repository, "r", LockMode::Read, "b", WAIT, &token())
            .await
            .unwrap();

        // a writer must wait for both readers
        let err = locks
            .acquire(
                ResourceType::Repository,
                "r",
                LockMode::Write,
                "c",
                Duration::from_millis(50),
                &token(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Timeout);

        locks.release(&r1.id).await.unwrap();
        drop(r1);
        // one reader still holds; writer still blocked
        assert_eq!(locks.held_locks().await, 1);
    }

    #[tokio::test]
    async fn writer_granted_after_readers_release_fifo() {
        let locks = manager();
        let r1 = locks
            .acquire(ResourceType::Repository, "r", LockMode::Read, "a", WAIT, &token())
            .await
            .unwrap();
        let r2 = locks
            .acquire(ResourceType::Repository, "r", LockMode::Read, "b", WAIT, &token())
            .await
            .unwrap();

        let locks2 = Arc::clone(&locks);
        let writer = tokio::spawn(async move {
            locks2
                .acquire(ResourceType::Repository, "r", LockMode::Write, "w", WAIT, &token())
                .await
        });
        // give the writer time to queue up
        tokio::time::sleep(Duration::from_millis(50)).await;

        // a late reader queues behind the writer and must not jump it
        let locks3 = Arc::clone(&locks);
        let late_reader = tokio::spawn(async move {
            locks3
                .acquire(ResourceType::Repository, "r", LockMode::Read, "late", WAIT, &token())
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        locks.release(&r1.id).await.unwrap();
        locks.release(&r2.id).await.unwrap();

        let write_lock = writer.await.unwrap().unwrap();
        assert_eq!(write_lock.mode, LockMode::Write);
        // the late reader is only granted once the writer releases
        assert!(!late_reader.is_finished());
        locks.release(&write_lock.id).await.unwrap();
        let read_lock = late_reader.await.unwrap().unwrap();
        assert_eq!(read_lock.mode, LockMode::Read);
    }

    #[tokio::test]
    async fn exclusive_excludes_everything() {
        let locks = manager();
        let ex = locks
            .acquire(ResourceType::Index, "main", LockMode::Exclusive, "x", WAIT, &token())
            .await
            .unwrap();
        for mode in [LockMode::Read, LockMode::Write, LockMode::Exclusive] {
            let err = locks
                .acquire(
                    ResourceType::Index,
                    "main",
                    mode,
                    "y",
                    Duration::from_millis(30),
                    &token(),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind, crate::errors::ErrorKind::Timeout);
        }
        locks.release(&ex.id).await.unwrap();
        assert_eq!(locks.held_locks().await, 0);
    }

    #[tokio::test]
    async fn cancellation_drops_the_waiter() {
        let locks = manager();
        let held = locks
            .acquire(ResourceType::File, "f", LockMode::Write, "a", WAIT, &token())
            .await
            .unwrap();

        let cancel = token();
        let locks2 = Arc::clone(&locks);
        let cancel2 = cancel.clone();
        let waiter = tokio::spawn(async move {
            locks2
                .acquire(ResourceType::File, "f", LockMode::Write, "b", WAIT, &cancel2)
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Cancelled);

        // the abandoned waiter no longer blocks the queue
        locks.release(&held.id).await.unwrap();
        let again = locks
            .acquire(ResourceType::File, "f", LockMode::Write, "c", WAIT, &token())
            .await
            .unwrap();
        locks.release(&again.id).await.unwrap();
    }

    #[tokio::test]
    async fn expired_locks_are_swept() {
        let locks = Arc::new(LockManager::new(Duration::from_millis(10)));
        let _stale = locks
            .acquire(ResourceType::Session, "s", LockMode::Write, "a", WAIT, &token())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let released = locks.sweep_expired().await;
        assert_eq!(released, 1);
        assert_eq!(locks.held_locks().await, 0);
    }

    #[tokio::test]
    async fn concurrent_acquire_release_respects_matrix() {
        let locks = manager();
        let mut workers = Vec::new();
        for worker in 0..8 {
            let locks = Arc::clone(&locks);
            workers.push(tokio::spawn(async move {
                for round in 0..20 {
                    let mode = match (worker + round) % 3 {
                        0 => LockMode::Read,
                        1 => LockMode::Write,
                        _ => LockMode::Exclusive,
                    };
                    let lock = locks
                        .acquire(
                            ResourceType::Repository,
                            "shared",
                            mode,
                            &format!("w{worker}"),
                            Duration::from_secs(10),
                            &CancellationToken::new(),
                        )
                        .await
                        .expect("no deadlock under ordered acquisition");
                    tokio::time::sleep(Duration::from_micros(200)).await;
                    locks.release(&lock.id).await.unwrap();
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(locks.held_locks().await, 0);
    }
}
