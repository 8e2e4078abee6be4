//! The coordinator: submission, claimed passes and branch dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use txweave_core::{
    Branch, BranchCall, BranchOp, BranchStatus, Gid, GlobalStatus, GlobalTransaction, Outcome,
    TransProtocol, TransportError, classify,
};
use txweave_infra::{StoreError, TransStore, Transport};

use crate::config::EngineConfig;
use crate::definition::TransDefinition;
use crate::error::EngineError;
use crate::{saga, tcc, xa};

/// Result of one claimed pass over a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The transaction is in a terminal status.
    Terminal(GlobalStatus),
    /// Still running; released for a later retry.
    Pending(GlobalStatus),
}

/// A transaction together with its branch records.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    pub transaction: GlobalTransaction,
    pub branches: Vec<Branch>,
}

/// What a protocol driver wants after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Done,
    Retry,
}

/// Result of a sequential forward phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Forward {
    Completed,
    /// Roll back, with the reason recorded on the transaction.
    Aborted(String),
    Pending,
}

/// Transaction coordinator.
///
/// Cheap to clone; clones share the store, transport and worker identity.
/// Every claim takes a fresh lease token under that identity, so two passes
/// started by the same engine exclude each other like any two workers.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TransStore>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    owner: String,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("owner", &self.inner.owner)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Engine {
    pub fn new(
        store: Arc<dyn TransStore>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                transport,
                config,
                owner: format!("engine-{}", Uuid::now_v7().simple()),
            }),
        })
    }

    /// Worker identity of this engine instance.
    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// A lease token for one claim: `{owner}/{uuid}`.
    pub(crate) fn lease_token(&self) -> String {
        format!("{}/{}", self.owner(), Uuid::now_v7().simple())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn TransStore> {
        &self.inner.store
    }

    /// Persist `def` and start driving it.
    ///
    /// Returns as soon as the records are stored, unless the definition
    /// asks to wait for the result.
    pub async fn submit(&self, def: TransDefinition) -> Result<Gid, EngineError> {
        let (mut trans, branches) = self.records(&def, GlobalStatus::Submitted)?;
        trans.owner = Some(self.lease_token());
        trans.lease_expires_at = Some(after(Utc::now(), self.config().lease));
        self.create(&trans, &branches).await?;
        info!(
            gid = %trans.gid,
            protocol = %trans.protocol,
            branches = def.branches.len(),
            "transaction submitted"
        );

        let gid = trans.gid.clone();
        let wait = trans.wait_result;
        self.spawn_pass(trans);
        if wait {
            self.wait_for(&gid).await?;
        }
        Ok(gid)
    }

    /// Register `def` without driving it; see [`submit_prepared`](Self::submit_prepared).
    pub async fn prepare(&self, def: TransDefinition) -> Result<Gid, EngineError> {
        let (mut trans, branches) = self.records(&def, GlobalStatus::Prepared)?;
        // The scheduler only needs to look at it once it has expired.
        trans.next_retry_at = self.prepared_deadline(&trans);
        self.create(&trans, &branches).await?;
        info!(gid = %trans.gid, protocol = %trans.protocol, "transaction prepared");
        Ok(trans.gid)
    }

    /// Start a prepared transaction.
    pub async fn submit_prepared(&self, gid: &Gid) -> Result<(), EngineError> {
        let current = self
            .store()
            .get(gid)
            .await?
            .ok_or_else(|| EngineError::NotFound(gid.clone()))?;
        if current.status != GlobalStatus::Prepared {
            return Err(EngineError::InvalidState {
                gid: gid.clone(),
                status: current.status,
            });
        }

        let mut trans = self
            .store()
            .try_claim(gid, &self.lease_token(), Utc::now(), self.config().lease)
            .await?
            .ok_or_else(|| EngineError::Busy(gid.clone()))?;
        if let Err(err) = self.transition(&mut trans, GlobalStatus::Submitted, None).await {
            self.release_quietly(&trans).await;
            return Err(match err {
                EngineError::Store(StoreError::Conflict(_)) => EngineError::InvalidState {
                    gid: gid.clone(),
                    status: self.current_status(gid).await.unwrap_or(trans.status),
                },
                other => other,
            });
        }

        let wait = trans.wait_result;
        self.spawn_pass(trans);
        if wait {
            self.wait_for(gid).await?;
        }
        Ok(())
    }

    /// Claim `gid` and drive it as far as it will go right now.
    ///
    /// Fails with [`EngineError::Busy`] while any pass holds a live lease,
    /// including one started by this engine.
    pub async fn process(&self, gid: &Gid) -> Result<PassOutcome, EngineError> {
        let claimed = self
            .store()
            .try_claim(gid, &self.lease_token(), Utc::now(), self.config().lease)
            .await?;
        match claimed {
            Some(trans) => self.run_pass(trans).await,
            None => match self.store().get(gid).await? {
                None => Err(EngineError::NotFound(gid.clone())),
                Some(trans) if trans.is_terminal() => Ok(PassOutcome::Terminal(trans.status)),
                Some(_) => Err(EngineError::Busy(gid.clone())),
            },
        }
    }

    pub async fn query(&self, gid: &Gid) -> Result<TransactionView, EngineError> {
        let transaction = self
            .store()
            .get(gid)
            .await?
            .ok_or_else(|| EngineError::NotFound(gid.clone()))?;
        let branches = self.store().load_branches(gid).await?;
        Ok(TransactionView {
            transaction,
            branches,
        })
    }

    pub async fn list_by_status(
        &self,
        status: GlobalStatus,
        limit: usize,
    ) -> Result<Vec<GlobalTransaction>, EngineError> {
        Ok(self.store().list_by_status(status, limit).await?)
    }

    /// Drive an already-claimed transaction, then release or finish it.
    pub(crate) async fn run_pass(
        &self,
        trans: GlobalTransaction,
    ) -> Result<PassOutcome, EngineError> {
        let gid = trans.gid.clone();
        let token = lease_token_of(&trans)?.to_string();
        let retry_count = trans.retry_count;
        match self.drive(trans).await {
            Ok((Progress::Done, status)) => Ok(PassOutcome::Terminal(status)),
            Ok((Progress::Retry, status)) => {
                self.release(&gid, &token, status, retry_count).await?;
                Ok(PassOutcome::Pending(status))
            }
            Err(EngineError::LeaseLost(gid)) => Err(EngineError::LeaseLost(gid)),
            Err(err) => {
                warn!(gid = %gid, error = %err, "pass aborted, will retry");
                let status = self
                    .current_status(&gid)
                    .await
                    .unwrap_or(GlobalStatus::Submitted);
                if let Err(release) = self.release(&gid, &token, status, retry_count).await {
                    warn!(gid = %gid, error = %release, "failed to release transaction");
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        mut trans: GlobalTransaction,
    ) -> Result<(Progress, GlobalStatus), EngineError> {
        if self.config().retry.is_stuck(trans.retry_count) {
            error!(
                gid = %trans.gid,
                status = %trans.status,
                retry_count = trans.retry_count,
                "transaction stuck"
            );
        }

        if trans.status == GlobalStatus::Prepared {
            if Utc::now() < self.prepared_deadline(&trans) {
                return Ok((Progress::Retry, trans.status));
            }
            warn!(gid = %trans.gid, "prepared transaction expired before submission");
            self.transition(
                &mut trans,
                GlobalStatus::Aborting,
                Some("prepared transaction was never submitted"),
            )
            .await?;
        }

        let mut branches = self.store().load_branches(&trans.gid).await?;
        let progress = match trans.protocol {
            TransProtocol::Saga => saga::drive(self, &mut trans, &mut branches).await?,
            TransProtocol::Tcc => tcc::drive(self, &mut trans, &mut branches).await?,
            TransProtocol::Xa => xa::drive(self, &mut trans, &mut branches).await?,
        };
        Ok((progress, trans.status))
    }

    /// Run every `op` branch in declared order until one does not succeed.
    pub(crate) async fn run_forward(
        &self,
        trans: &GlobalTransaction,
        branches: &mut [Branch],
        op: BranchOp,
    ) -> Result<Forward, EngineError> {
        for branch in branches.iter_mut().filter(|b| b.op == op) {
            match branch.status {
                BranchStatus::Succeeded => continue,
                BranchStatus::Failed => {
                    return Ok(Forward::Aborted(format!(
                        "branch {} {op} failed",
                        branch.branch_id()
                    )));
                }
                BranchStatus::Pending | BranchStatus::Ongoing => {}
            }

            if trans.is_past_deadline(Utc::now()) {
                return Ok(Forward::Aborted(format!(
                    "branch {} {op} unresolved after timeout_to_fail",
                    branch.branch_id()
                )));
            }

            match self.call_branch(trans, branch).await? {
                Outcome::Success => continue,
                Outcome::Failure => {
                    return Ok(Forward::Aborted(format!(
                        "branch {} {op} failed",
                        branch.branch_id()
                    )));
                }
                Outcome::Ongoing if trans.is_past_deadline(Utc::now()) => {
                    return Ok(Forward::Aborted(format!(
                        "branch {} {op} unresolved after timeout_to_fail",
                        branch.branch_id()
                    )));
                }
                Outcome::Ongoing => return Ok(Forward::Pending),
            }
        }
        Ok(Forward::Completed)
    }

    /// Send one branch operation and record its interpreted outcome.
    pub(crate) async fn call_branch(
        &self,
        trans: &GlobalTransaction,
        branch: &mut Branch,
    ) -> Result<Outcome, EngineError> {
        self.renew_lease(trans).await?;

        let call = BranchCall::for_branch(trans, branch);
        let timeout = self.config().request_timeout;
        let result = match tokio::time::timeout(timeout, self.inner.transport.invoke(&call)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        let outcome = classify(result.as_ref());

        match &result {
            Ok(response) => debug!(
                gid = %call.gid,
                branch_id = %call.branch_id,
                op = %call.op,
                status = response.status,
                outcome = ?outcome,
                "branch call returned"
            ),
            Err(err) => warn!(
                gid = %call.gid,
                branch_id = %call.branch_id,
                op = %call.op,
                error = %err,
                "branch call did not complete"
            ),
        }
        if outcome == Outcome::Failure && !branch.op.is_forward() {
            warn!(
                gid = %call.gid,
                branch_id = %call.branch_id,
                op = %call.op,
                "participant rejected a second-phase operation, retrying"
            );
        }

        let status = match outcome {
            Outcome::Success => BranchStatus::Succeeded,
            Outcome::Failure => BranchStatus::Failed,
            Outcome::Ongoing => BranchStatus::Ongoing,
        };
        self.store()
            .update_branch_status(&branch.gid, branch.branch_index, branch.op, status)
            .await?;
        branch.status = status;
        Ok(outcome)
    }

    /// Move the transaction to `to`, in the store first.
    pub(crate) async fn transition(
        &self,
        trans: &mut GlobalTransaction,
        to: GlobalStatus,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        trans.status.check_transition(to)?;
        self.store()
            .transition(&trans.gid, trans.status, to, reason)
            .await?;
        info!(gid = %trans.gid, from = %trans.status, to = %to, reason, "transaction status changed");
        trans.status = to;
        if let Some(reason) = reason {
            trans.rollback_reason = Some(reason.to_string());
        }
        Ok(())
    }

    fn records(
        &self,
        def: &TransDefinition,
        status: GlobalStatus,
    ) -> Result<(GlobalTransaction, Vec<Branch>), EngineError> {
        let (mut trans, branches) = def.to_records(status)?;
        if trans.timeout_to_fail.is_none() {
            trans.timeout_to_fail = self.config().default_timeout_to_fail;
        }
        Ok((trans, branches))
    }

    async fn create(
        &self,
        trans: &GlobalTransaction,
        branches: &[Branch],
    ) -> Result<(), EngineError> {
        match self.store().create_transaction(trans, branches).await {
            Err(StoreError::AlreadyExists(_)) => Err(EngineError::AlreadyExists(trans.gid.clone())),
            other => Ok(other?),
        }
    }

    fn spawn_pass(&self, trans: GlobalTransaction) {
        let engine = self.clone();
        tokio::spawn(async move {
            let gid = trans.gid.clone();
            if let Err(err) = engine.run_pass(trans).await {
                warn!(gid = %gid, error = %err, "initial pass failed");
            }
        });
    }

    async fn wait_for(&self, gid: &Gid) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + self.config().wait_timeout;
        loop {
            let trans = self
                .store()
                .get(gid)
                .await?
                .ok_or_else(|| EngineError::NotFound(gid.clone()))?;
            match trans.status {
                GlobalStatus::Finished => return Ok(()),
                GlobalStatus::Failed => {
                    return Err(EngineError::RolledBack {
                        gid: gid.clone(),
                        reason: trans
                            .rollback_reason
                            .unwrap_or_else(|| "rolled back".to_string()),
                    });
                }
                status if tokio::time::Instant::now() >= deadline => {
                    return Err(EngineError::WaitTimeout {
                        gid: gid.clone(),
                        status,
                    });
                }
                _ => tokio::time::sleep(self.config().wait_poll_interval).await,
            }
        }
    }

    async fn renew_lease(&self, trans: &GlobalTransaction) -> Result<(), EngineError> {
        let token = lease_token_of(trans)?;
        let renewed = self
            .store()
            .renew(&trans.gid, token, Utc::now(), self.config().lease)
            .await?;
        if !renewed {
            return Err(EngineError::LeaseLost(trans.gid.clone()));
        }
        Ok(())
    }

    async fn release(
        &self,
        gid: &Gid,
        token: &str,
        status: GlobalStatus,
        retry_count: u32,
    ) -> Result<(), EngineError> {
        let next_retry_at = if status == GlobalStatus::Prepared {
            match self.store().get(gid).await? {
                Some(trans) => self.prepared_deadline(&trans),
                None => return Err(EngineError::NotFound(gid.clone())),
            }
        } else {
            let delay = self
                .config()
                .retry
                .delay_for_attempt(retry_count.saturating_add(1));
            after(Utc::now(), delay)
        };
        self.store()
            .release(gid, token, next_retry_at)
            .await?;
        debug!(gid = %gid, status = %status, next_retry_at = %next_retry_at, "transaction released");
        Ok(())
    }

    async fn release_quietly(&self, trans: &GlobalTransaction) {
        let Some(token) = trans.owner.as_deref() else {
            return;
        };
        if let Err(err) = self.store().release(&trans.gid, token, Utc::now()).await {
            warn!(gid = %trans.gid, error = %err, "failed to release transaction");
        }
    }

    async fn current_status(&self, gid: &Gid) -> Option<GlobalStatus> {
        match self.store().get(gid).await {
            Ok(Some(trans)) => Some(trans.status),
            _ => None,
        }
    }

    fn prepared_deadline(&self, trans: &GlobalTransaction) -> DateTime<Utc> {
        trans
            .fail_deadline()
            .unwrap_or_else(|| after(trans.created_at, self.config().prepared_timeout))
    }
}

fn lease_token_of(trans: &GlobalTransaction) -> Result<&str, EngineError> {
    trans
        .owner
        .as_deref()
        .ok_or_else(|| EngineError::LeaseLost(trans.gid.clone()))
}

/// `at + duration`, saturating far in the future.
pub(crate) fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
