//! Global transaction and branch records.
//!
//! These are the rows the coordinator persists. They carry no behaviour
//! beyond status bookkeeping; the engine decides every transition.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, CoreResult};
use crate::id::{Gid, branch_id};

macro_rules! str_enum {
    ($t:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($t::$variant => $name,)+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $t {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($t::$variant),)+
                    other => Err(CoreError::unknown($kind, other)),
                }
            }
        }
    };
}

/// Transaction protocol of a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransProtocol {
    Saga,
    Tcc,
    Xa,
}

str_enum!(TransProtocol, "protocol", {
    Saga => "saga",
    Tcc => "tcc",
    Xa => "xa",
});

/// Overall status of a global transaction.
///
/// ```text
/// prepared -> submitted -> succeeding -> finished
///     |           |
///     +-----------+-> aborting -> failed
/// ```
///
/// `Finished` (committed) and `Failed` (rolled back) are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalStatus {
    /// Registered but not yet released for execution.
    Prepared,
    /// Forward phase in progress (actions / tries / prepares).
    Submitted,
    /// Rolling back: compensations / cancels / XA rollbacks in flight.
    Aborting,
    /// Outcome is commit; second-phase calls may still be in flight.
    Succeeding,
    /// Rolled back. Terminal.
    Failed,
    /// Committed. Terminal.
    Finished,
}

str_enum!(GlobalStatus, "global status", {
    Prepared => "prepared",
    Submitted => "submitted",
    Aborting => "aborting",
    Succeeding => "succeeding",
    Failed => "failed",
    Finished => "finished",
});

impl GlobalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GlobalStatus::Failed | GlobalStatus::Finished)
    }

    /// Whether `self -> to` is an edge of the state machine.
    pub fn can_transition_to(&self, to: GlobalStatus) -> bool {
        use GlobalStatus::*;
        matches!(
            (self, to),
            (Prepared, Submitted)
                | (Prepared, Aborting)
                | (Submitted, Succeeding)
                | (Submitted, Aborting)
                | (Succeeding, Finished)
                | (Aborting, Failed)
        )
    }

    pub fn check_transition(&self, to: GlobalStatus) -> CoreResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Statuses the retry scheduler may pick up.
    pub fn driveable() -> [GlobalStatus; 4] {
        [
            GlobalStatus::Prepared,
            GlobalStatus::Submitted,
            GlobalStatus::Aborting,
            GlobalStatus::Succeeding,
        ]
    }
}

/// Operation a branch record performs against its participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOp {
    Action,
    Compensate,
    Try,
    Confirm,
    Cancel,
    Prepare,
    Commit,
    Rollback,
}

str_enum!(BranchOp, "branch op", {
    Action => "action",
    Compensate => "compensate",
    Try => "try",
    Confirm => "confirm",
    Cancel => "cancel",
    Prepare => "prepare",
    Commit => "commit",
    Rollback => "rollback",
});

impl BranchOp {
    /// Forward operations may be abandoned; their counterparts never are.
    pub fn is_forward(&self) -> bool {
        matches!(self, BranchOp::Action | BranchOp::Try | BranchOp::Prepare)
    }

    /// The operation whose effect this one undoes, if any.
    pub fn undoes(&self) -> Option<BranchOp> {
        match self {
            BranchOp::Compensate => Some(BranchOp::Action),
            BranchOp::Cancel => Some(BranchOp::Try),
            BranchOp::Rollback => Some(BranchOp::Prepare),
            _ => None,
        }
    }
}

/// Status of one branch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Never dispatched.
    Pending,
    Succeeded,
    Failed,
    /// Dispatched at least once, outcome unknown or in progress.
    Ongoing,
}

str_enum!(BranchStatus, "branch status", {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
    Ongoing => "ongoing",
});

impl BranchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BranchStatus::Succeeded | BranchStatus::Failed)
    }

    /// The participant may have applied an effect for this record.
    pub fn was_attempted(&self) -> bool {
        !matches!(self, BranchStatus::Pending)
    }
}

/// A global transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTransaction {
    pub gid: Gid,
    pub protocol: TransProtocol,
    pub status: GlobalStatus,
    /// Submitter blocks until a terminal status.
    pub wait_result: bool,
    /// Number of scheduler claims so far.
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
    /// Earliest time the scheduler may claim this transaction again.
    pub next_retry_at: DateTime<Utc>,
    /// Worker currently driving the transaction.
    pub owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Forward operations still unresolved after this long are abandoned.
    pub timeout_to_fail: Option<Duration>,
    pub rollback_reason: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GlobalTransaction {
    /// Create a fresh record in `status`, due immediately.
    pub fn new(gid: Gid, protocol: TransProtocol, status: GlobalStatus) -> Self {
        let now = Utc::now();
        Self {
            gid,
            protocol,
            status,
            wait_result: false,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            last_retry_at: None,
            next_retry_at: now,
            owner: None,
            lease_expires_at: None,
            timeout_to_fail: None,
            rollback_reason: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time after which unresolved forward operations are abandoned.
    pub fn fail_deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = self.timeout_to_fail?;
        chrono::Duration::from_std(timeout)
            .ok()
            .map(|d| self.created_at + d)
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.fail_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Whether the lease (if any) has lapsed at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_none_or(|at| at <= now)
    }
}

/// A branch record: one operation of one logical branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub gid: Gid,
    /// 0-based position in the declared branch order.
    pub branch_index: u32,
    pub op: BranchOp,
    pub endpoint: String,
    pub payload: JsonValue,
    pub status: BranchStatus,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(
        gid: Gid,
        branch_index: u32,
        op: BranchOp,
        endpoint: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            gid,
            branch_index,
            op,
            endpoint: endpoint.into(),
            payload,
            status: BranchStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    pub fn branch_id(&self) -> String {
        branch_id(self.branch_index)
    }
}

/// Everything a participant receives for one dispatched branch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCall {
    pub endpoint: String,
    pub gid: Gid,
    pub protocol: TransProtocol,
    pub branch_id: String,
    pub op: BranchOp,
    pub payload: JsonValue,
}

impl BranchCall {
    pub fn for_branch(trans: &GlobalTransaction, branch: &Branch) -> Self {
        Self {
            endpoint: branch.endpoint.clone(),
            gid: trans.gid.clone(),
            protocol: trans.protocol,
            branch_id: branch.branch_id(),
            op: branch.op,
            payload: branch.payload.clone(),
        }
    }

    /// Request parameters identifying the branch operation on the wire.
    pub fn query_params(&self) -> [(&'static str, String); 4] {
        [
            ("trans_type", self.protocol.to_string()),
            ("gid", self.gid.to_string()),
            ("branch_id", self.branch_id.clone()),
            ("op", self.op.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use GlobalStatus::*;
        assert!(Prepared.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Aborting));
        assert!(Submitted.can_transition_to(Succeeding));
        assert!(Succeeding.can_transition_to(Finished));
        assert!(Aborting.can_transition_to(Failed));

        assert!(!Aborting.can_transition_to(Succeeding));
        assert!(!Succeeding.can_transition_to(Aborting));
        assert!(!Failed.can_transition_to(Submitted));
        assert!(!Finished.can_transition_to(Aborting));
        assert!(Finished.check_transition(Submitted).is_err());
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for op in [
            BranchOp::Action,
            BranchOp::Compensate,
            BranchOp::Try,
            BranchOp::Confirm,
            BranchOp::Cancel,
            BranchOp::Prepare,
            BranchOp::Commit,
            BranchOp::Rollback,
        ] {
            assert_eq!(op.as_str().parse::<BranchOp>().unwrap(), op);
        }
        assert_eq!("aborting".parse::<GlobalStatus>().unwrap(), GlobalStatus::Aborting);
        assert!("halfway".parse::<GlobalStatus>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        let json = serde_json::to_string(&BranchOp::Compensate).unwrap();
        assert_eq!(json, "\"compensate\"");
        let json = serde_json::to_string(&GlobalStatus::Succeeding).unwrap();
        assert_eq!(json, "\"succeeding\"");
    }

    #[test]
    fn undo_pairs() {
        assert_eq!(BranchOp::Compensate.undoes(), Some(BranchOp::Action));
        assert_eq!(BranchOp::Cancel.undoes(), Some(BranchOp::Try));
        assert_eq!(BranchOp::Confirm.undoes(), None);
        assert!(BranchOp::Try.is_forward());
        assert!(!BranchOp::Cancel.is_forward());
    }

    #[test]
    fn deadline_follows_timeout_to_fail() {
        let gid = Gid::new("g1").unwrap();
        let mut trans = GlobalTransaction::new(gid, TransProtocol::Saga, GlobalStatus::Submitted);
        assert!(!trans.is_past_deadline(Utc::now() + chrono::Duration::days(365)));

        trans.timeout_to_fail = Some(Duration::from_secs(10));
        assert!(!trans.is_past_deadline(trans.created_at + chrono::Duration::seconds(9)));
        assert!(trans.is_past_deadline(trans.created_at + chrono::Duration::seconds(10)));
    }

    #[test]
    fn branch_call_carries_wire_identity() {
        let gid = Gid::new("g1").unwrap();
        let trans = GlobalTransaction::new(gid.clone(), TransProtocol::Tcc, GlobalStatus::Submitted);
        let branch = Branch::new(gid, 1, BranchOp::Cancel, "http://svc/cancel", serde_json::json!({}));
        let call = BranchCall::for_branch(&trans, &branch);

        let params = call.query_params();
        assert_eq!(params[0], ("trans_type", "tcc".to_string()));
        assert_eq!(params[2], ("branch_id", "02".to_string()));
        assert_eq!(params[3], ("op", "cancel".to_string()));
    }
}
