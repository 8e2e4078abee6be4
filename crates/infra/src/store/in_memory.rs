use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use txweave_core::{Branch, BranchOp, BranchStatus, Gid, GlobalStatus, GlobalTransaction};

use super::r#trait::{StoreError, TransStore, lease_until};

#[derive(Debug, Clone)]
struct Entry {
    trans: GlobalTransaction,
    branches: Vec<Branch>,
}

/// In-memory transaction store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTransStore {
    entries: RwLock<HashMap<Gid, Entry>>,
}

impl InMemoryTransStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Gid, Entry>>, StoreError> {
        self.entries
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Gid, Entry>>, StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))
    }
}

fn claimable(trans: &GlobalTransaction, now: DateTime<Utc>) -> bool {
    !trans.is_terminal() && trans.lease_expired(now)
}

#[async_trait]
impl TransStore for InMemoryTransStore {
    async fn create_transaction(
        &self,
        trans: &GlobalTransaction,
        branches: &[Branch],
    ) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        if entries.contains_key(&trans.gid) {
            return Err(StoreError::AlreadyExists(trans.gid.to_string()));
        }
        let mut branches = branches.to_vec();
        branches.sort_by_key(|b| (b.branch_index, b.op));
        entries.insert(
            trans.gid.clone(),
            Entry {
                trans: trans.clone(),
                branches,
            },
        );
        Ok(())
    }

    async fn get(&self, gid: &Gid) -> Result<Option<GlobalTransaction>, StoreError> {
        Ok(self.read()?.get(gid).map(|e| e.trans.clone()))
    }

    async fn load_branches(&self, gid: &Gid) -> Result<Vec<Branch>, StoreError> {
        Ok(self
            .read()?
            .get(gid)
            .map(|e| e.branches.clone())
            .unwrap_or_default())
    }

    async fn update_branch_status(
        &self,
        gid: &Gid,
        branch_index: u32,
        op: BranchOp,
        status: BranchStatus,
    ) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        let entry = entries
            .get_mut(gid)
            .ok_or_else(|| StoreError::NotFound(gid.to_string()))?;
        let branch = entry
            .branches
            .iter_mut()
            .find(|b| b.branch_index == branch_index && b.op == op)
            .ok_or_else(|| StoreError::NotFound(format!("{gid}/{branch_index}/{op}")))?;
        branch.status = status;
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(
        &self,
        gid: &Gid,
        from: GlobalStatus,
        to: GlobalStatus,
        rollback_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        let trans = &mut entries
            .get_mut(gid)
            .ok_or_else(|| StoreError::NotFound(gid.to_string()))?
            .trans;
        if trans.status != from {
            return Err(StoreError::Conflict(format!(
                "{gid} is {}, expected {from}",
                trans.status
            )));
        }
        let now = Utc::now();
        trans.status = to;
        trans.updated_at = now;
        if let Some(reason) = rollback_reason {
            trans.rollback_reason = Some(reason.to_string());
        }
        if to.is_terminal() {
            trans.finished_at = Some(now);
            trans.owner = None;
            trans.lease_expires_at = None;
        }
        Ok(())
    }

    async fn try_claim(
        &self,
        gid: &Gid,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<GlobalTransaction>, StoreError> {
        let mut entries = self.write()?;
        let Some(entry) = entries.get_mut(gid) else {
            return Ok(None);
        };
        if !claimable(&entry.trans, now) {
            return Ok(None);
        }
        entry.trans.owner = Some(owner.to_string());
        entry.trans.lease_expires_at = Some(lease_until(now, lease));
        Ok(Some(entry.trans.clone()))
    }

    async fn claim_due_for_retry(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<GlobalTransaction>, StoreError> {
        let mut entries = self.write()?;
        let mut due: Vec<&mut Entry> = entries
            .values_mut()
            .filter(|e| e.trans.next_retry_at <= now && claimable(&e.trans, now))
            .collect();
        due.sort_by_key(|e| e.trans.next_retry_at);

        let mut claimed = Vec::new();
        for entry in due.into_iter().take(limit) {
            let trans = &mut entry.trans;
            trans.owner = Some(owner.to_string());
            trans.lease_expires_at = Some(lease_until(now, lease));
            trans.retry_count = trans.retry_count.saturating_add(1);
            trans.last_retry_at = Some(now);
            trans.updated_at = now;
            claimed.push(trans.clone());
        }
        Ok(claimed)
    }

    async fn renew(
        &self,
        gid: &Gid,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        let Some(entry) = entries.get_mut(gid) else {
            return Ok(false);
        };
        let trans = &mut entry.trans;
        if trans.is_terminal() || trans.owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        trans.lease_expires_at = Some(lease_until(now, lease));
        Ok(true)
    }

    async fn release(
        &self,
        gid: &Gid,
        owner: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        let trans = &mut entries
            .get_mut(gid)
            .ok_or_else(|| StoreError::NotFound(gid.to_string()))?
            .trans;
        if trans.owner.as_deref() != Some(owner) {
            return Err(StoreError::Conflict(format!("{gid} is not leased by {owner}")));
        }
        trans.owner = None;
        trans.lease_expires_at = None;
        trans.next_retry_at = next_retry_at;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: GlobalStatus,
        limit: usize,
    ) -> Result<Vec<GlobalTransaction>, StoreError> {
        let entries = self.read()?;
        let mut found: Vec<GlobalTransaction> = entries
            .values()
            .filter(|e| e.trans.status == status)
            .map(|e| e.trans.clone())
            .collect();
        found.sort_by_key(|t| t.created_at);
        found.truncate(limit);
        Ok(found)
    }
}
