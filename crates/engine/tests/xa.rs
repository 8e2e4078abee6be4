mod common;

use serde_json::json;

use common::*;
use txweave_core::{BranchOp, GlobalStatus};
use txweave_engine::{EngineError, XaBuilder};

fn ops_for(participants: &Participants, endpoint: &str) -> Vec<BranchOp> {
    participants
        .ops()
        .into_iter()
        .filter(|(e, _)| e == endpoint)
        .map(|(_, op)| op)
        .collect()
}

#[tokio::test]
async fn prepares_then_commits_every_branch_in_order() {
    let participants = Participants::new();
    let engine = engine(&participants);
    participants.script("db1/xa", vec![]);
    participants.script("db2/xa", vec![]);

    let def = XaBuilder::new(gid("xa-ok"))
        .add("db1/xa", json!({"amount": 30}))
        .add("db2/xa", json!({"amount": 30}))
        .wait_result(true)
        .build()
        .unwrap();
    let gid = engine.submit(def).await.unwrap();

    assert_eq!(
        participants.ops(),
        vec![
            ("db1/xa".to_string(), BranchOp::Prepare),
            ("db2/xa".to_string(), BranchOp::Prepare),
            ("db1/xa".to_string(), BranchOp::Commit),
            ("db2/xa".to_string(), BranchOp::Commit),
        ]
    );
    assert_eq!(
        engine.query(&gid).await.unwrap().transaction.status,
        GlobalStatus::Finished
    );
}

#[tokio::test]
async fn failed_prepare_rolls_back_every_branch() {
    let participants = Participants::new();
    let engine = engine(&participants);
    participants.script("db1/xa", vec![]);
    participants.script("db2/xa", vec![fail()]);

    let def = XaBuilder::new(gid("xa-fail"))
        .add("db1/xa", json!(null))
        .add("db2/xa", json!(null))
        .wait_result(true)
        .build()
        .unwrap();
    let err = engine.submit(def).await.unwrap_err();

    assert!(matches!(err, EngineError::RolledBack { .. }));
    assert_eq!(ops_for(&participants, "db1/xa"), vec![BranchOp::Prepare, BranchOp::Rollback]);
    assert_eq!(ops_for(&participants, "db2/xa"), vec![BranchOp::Prepare, BranchOp::Rollback]);
}
