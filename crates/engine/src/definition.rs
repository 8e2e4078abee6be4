//! Submitted transaction definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use txweave_core::{
    Branch, BranchOp, CoreError, Gid, GlobalStatus, GlobalTransaction, TransProtocol,
};

/// One logical branch: the endpoints of each of its operations plus the
/// payload they all receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum BranchSpec {
    Saga {
        action: String,
        compensate: String,
        #[serde(default)]
        payload: JsonValue,
    },
    Tcc {
        #[serde(rename = "try")]
        try_endpoint: String,
        confirm: String,
        cancel: String,
        #[serde(default)]
        payload: JsonValue,
    },
    /// XA participants expose one endpoint and switch on the `op` parameter.
    Xa {
        endpoint: String,
        #[serde(default)]
        payload: JsonValue,
    },
}

impl BranchSpec {
    pub fn protocol(&self) -> TransProtocol {
        match self {
            BranchSpec::Saga { .. } => TransProtocol::Saga,
            BranchSpec::Tcc { .. } => TransProtocol::Tcc,
            BranchSpec::Xa { .. } => TransProtocol::Xa,
        }
    }

    pub fn payload(&self) -> &JsonValue {
        match self {
            BranchSpec::Saga { payload, .. }
            | BranchSpec::Tcc { payload, .. }
            | BranchSpec::Xa { payload, .. } => payload,
        }
    }

    /// Every operation of this branch with its endpoint.
    pub fn operations(&self) -> Vec<(BranchOp, &str)> {
        match self {
            BranchSpec::Saga {
                action, compensate, ..
            } => vec![
                (BranchOp::Action, action.as_str()),
                (BranchOp::Compensate, compensate.as_str()),
            ],
            BranchSpec::Tcc {
                try_endpoint,
                confirm,
                cancel,
                ..
            } => vec![
                (BranchOp::Try, try_endpoint.as_str()),
                (BranchOp::Confirm, confirm.as_str()),
                (BranchOp::Cancel, cancel.as_str()),
            ],
            BranchSpec::Xa { endpoint, .. } => vec![
                (BranchOp::Prepare, endpoint.as_str()),
                (BranchOp::Commit, endpoint.as_str()),
                (BranchOp::Rollback, endpoint.as_str()),
            ],
        }
    }
}

/// A global transaction as submitted: ordered branches of one protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct TransDefinition {
    pub gid: Gid,
    pub protocol: TransProtocol,
    pub branches: Vec<BranchSpec>,
    /// Block the submitter until the transaction is terminal.
    pub wait_result: bool,
    pub timeout_to_fail: Option<Duration>,
}

impl TransDefinition {
    pub fn new(gid: Gid, protocol: TransProtocol) -> Self {
        Self {
            gid,
            protocol,
            branches: Vec::new(),
            wait_result: false,
            timeout_to_fail: None,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.branches.is_empty() {
            return Err(CoreError::invalid_definition(format!(
                "{} transaction {} has no branches",
                self.protocol, self.gid
            )));
        }
        for (idx, branch) in self.branches.iter().enumerate() {
            if branch.protocol() != self.protocol {
                return Err(CoreError::invalid_definition(format!(
                    "branch {idx} is {} in a {} transaction",
                    branch.protocol(),
                    self.protocol
                )));
            }
            if let Some((op, _)) = branch
                .operations()
                .into_iter()
                .find(|(_, endpoint)| endpoint.trim().is_empty())
            {
                return Err(CoreError::invalid_definition(format!(
                    "branch {idx} has no {op} endpoint"
                )));
            }
        }
        if self.timeout_to_fail.is_some_and(|t| t.is_zero()) {
            return Err(CoreError::invalid_definition("timeout_to_fail must be positive"));
        }
        Ok(())
    }

    /// The records persisted for this definition, starting in `status`.
    pub fn to_records(
        &self,
        status: GlobalStatus,
    ) -> Result<(GlobalTransaction, Vec<Branch>), CoreError> {
        self.validate()?;
        let mut trans = GlobalTransaction::new(self.gid.clone(), self.protocol, status);
        trans.wait_result = self.wait_result;
        trans.timeout_to_fail = self.timeout_to_fail;

        let mut branches = Vec::with_capacity(self.branches.len() * 3);
        for (idx, spec) in self.branches.iter().enumerate() {
            let index = u32::try_from(idx)
                .map_err(|_| CoreError::invalid_definition("too many branches"))?;
            for (op, endpoint) in spec.operations() {
                branches.push(Branch::new(
                    self.gid.clone(),
                    index,
                    op,
                    endpoint,
                    spec.payload().clone(),
                ));
            }
        }
        Ok((trans, branches))
    }
}
