//! TCC driver.
//!
//! Tries run in declared order. If all succeed every confirm is sent,
//! otherwise every try that succeeded or may have succeeded is cancelled.
//! Second-phase calls for different branches run concurrently.

use futures::future::join_all;

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
                match engine.run_forward(trans, branches, BranchOp::Try).await? {
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
                let all: Vec<u32> = branches.iter().map(|b| b.branch_index).collect();
                if !phase_two(engine, trans, branches, BranchOp::Confirm, &all).await? {
                    return Ok(Progress::Retry);
                }
                engine
                    .transition(trans, GlobalStatus::Finished, None)
                    .await?;
            }
            GlobalStatus::Aborting => {
                let attempted: Vec<u32> = branches
                    .iter()
                    .filter(|b| b.op == BranchOp::Try)
                    .filter(|b| matches!(b.status, BranchStatus::Succeeded | BranchStatus::Ongoing))
                    .map(|b| b.branch_index)
                    .collect();
                if !phase_two(engine, trans, branches, BranchOp::Cancel, &attempted).await? {
                    return Ok(Progress::Retry);
                }
                engine.transition(trans, GlobalStatus::Failed, None).await?;
            }
            GlobalStatus::Finished | GlobalStatus::Failed => return Ok(Progress::Done),
            GlobalStatus::Prepared => return Ok(Progress::Retry),
        }
    }
}

/// Send `op` to the listed branches concurrently; `true` once all succeeded.
async fn phase_two(
    engine: &Engine,
    trans: &GlobalTransaction,
    branches: &mut [Branch],
    op: BranchOp,
    indices: &[u32],
) -> Result<bool, EngineError> {
    let calls = branches
        .iter_mut()
        .filter(|b| b.op == op && indices.contains(&b.branch_index))
        .filter(|b| b.status != BranchStatus::Succeeded)
        .map(|branch| engine.call_branch(trans, branch));

    let mut done = true;
    for result in join_all(calls).await {
        if result? != Outcome::Success {
            done = false;
        }
    }
    Ok(done)
}
