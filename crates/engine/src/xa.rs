//! XA driver.
//!
//! Phase 1 prepares every branch in order. Phase 2 commits every branch or,
//! after any prepare failure, rolls every branch back. Participants treat a
//! rollback of an xid they never prepared as a no-op.

use txweave_core::{Branch, BranchOp, BranchStatus, GlobalStatus, GlobalTransaction, Outcome};

use crate::engine::{Engine, Forward, Progress};
use crate::error::EngineError;

pub(crate) async fn drive(
    engine: &Engine,
    trans: &mut GlobalTransaction,
    branches: &mut [Branch],
) -> Result<Progress, EngineError> {
    loop {
        match trans.status {
            GlobalStatus::Submitted => {
                match engine.run_forward(trans, branches, BranchOp::Prepare).await? {
                    Forward::Completed => {
                        engine
                            .transition(trans, GlobalStatus::Succeeding, None)
                            .await?
                    }
                    Forward::Aborted(reason) => {
                        engine
                            .transition(trans, GlobalStatus::Aborting, Some(&reason))
                            .await?
                    }
                    Forward::Pending => return Ok(Progress::Retry),
                }
            }
            GlobalStatus::Succeeding => {
                if !finish_all(engine, trans, branches, BranchOp::Commit).await? {
                    return Ok(Progress::Retry);
                }
                engine
                    .transition(trans, GlobalStatus::Finished, None)
                    .await?;
            }
            GlobalStatus::Aborting => {
                if !finish_all(engine, trans, branches, BranchOp::Rollback).await? {
                    return Ok(Progress::Retry);
                }
                engine.transition(trans, GlobalStatus::Failed, None).await?;
            }
            GlobalStatus::Finished | GlobalStatus::Failed => return Ok(Progress::Done),
            GlobalStatus::Prepared => return Ok(Progress::Retry),
        }
    }
}

/// Commit or roll back every branch in order, stopping at the first one
/// that has not succeeded yet.
async fn finish_all(
    engine: &Engine,
    trans: &GlobalTransaction,
    branches: &mut [Branch],
    op: BranchOp,
) -> Result<bool, EngineError> {
    for branch in branches.iter_mut().filter(|b| b.op == op) {
        if branch.status == BranchStatus::Succeeded {
            continue;
        }
        if engine.call_branch(trans, branch).await? != Outcome::Success {
            return Ok(false);
        }
    }
    Ok(true)
}
