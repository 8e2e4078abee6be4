//! Saga driver.
//!
//! Actions run strictly in declared order. When one fails, compensations
//! run strictly in reverse order for every action that succeeded or whose
//! outcome is still unknown; an action the participant reported as failed
//! left no effect and is not compensated.

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
                match engine.run_forward(trans, branches, BranchOp::Action).await? {
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
            // Actions are already committed; nothing is left to confirm.
            GlobalStatus::Succeeding => {
                engine
                    .transition(trans, GlobalStatus::Finished, None)
                    .await?
            }
            GlobalStatus::Aborting => {
                if !compensate(engine, trans, branches).await? {
                    return Ok(Progress::Retry);
                }
                engine.transition(trans, GlobalStatus::Failed, None).await?;
            }
            GlobalStatus::Finished | GlobalStatus::Failed => return Ok(Progress::Done),
            GlobalStatus::Prepared => return Ok(Progress::Retry),
        }
    }
}

/// Returns `true` once every required compensation has succeeded.
async fn compensate(
    engine: &Engine,
    trans: &GlobalTransaction,
    branches: &mut [Branch],
) -> Result<bool, EngineError> {
    let to_undo: Vec<u32> = branches
        .iter()
        .filter(|b| b.op == BranchOp::Action)
        .filter(|b| matches!(b.status, BranchStatus::Succeeded | BranchStatus::Ongoing))
        .map(|b| b.branch_index)
        .collect();

    for branch in branches
        .iter_mut()
        .rev()
        .filter(|b| b.op == BranchOp::Compensate && to_undo.contains(&b.branch_index))
    {
        if branch.status == BranchStatus::Succeeded {
            continue;
        }
        if engine.call_branch(trans, branch).await? != Outcome::Success {
            return Ok(false);
        }
    }
    Ok(true)
}
