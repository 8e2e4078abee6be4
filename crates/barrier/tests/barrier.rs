//! Barrier behaviour against a real (in-memory SQLite) participant database.

use proptest::prelude::*;
use sqlx::{AnyPool, Row};

use txweave_barrier::{BarrierError, BarrierOutcome, BarrierTable, BranchBarrier};
use txweave_core::{BranchOp, Gid, TransProtocol};
use txweave_infra::connect;

const START_BALANCE: i64 = 100;

async fn participant() -> (AnyPool, BarrierTable) {
    let (pool, dialect) = connect("sqlite::memory:", 1).await.unwrap();
    let table = BarrierTable::new(dialect);
    table.migrate(&pool).await.unwrap();
    sqlx::query("CREATE TABLE user_account (user_id BIGINT PRIMARY KEY, balance BIGINT NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO user_account (user_id, balance) VALUES (1, ?)")
        .bind(START_BALANCE)
        .execute(&pool)
        .await
        .unwrap();
    (pool, table)
}

fn barrier(gid: &str, op: BranchOp) -> BranchBarrier {
    BranchBarrier::new(TransProtocol::Saga, Gid::new(gid).unwrap(), "01", op)
}

async fn balance(pool: &AnyPool) -> i64 {
    sqlx::query("SELECT balance FROM user_account WHERE user_id = 1")
        .fetch_one(pool)
        .await
        .unwrap()
        .get::<i64, _>("balance")
}

async fn barrier_rows(pool: &AnyPool, gid: &str) -> Vec<(String, String)> {
    sqlx::query("SELECT op, reason FROM barrier WHERE gid = ? ORDER BY op")
        .bind(gid)
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.get::<String, _>("op"), row.get::<String, _>("reason")))
        .collect()
}

/// Deliver one guarded balance adjustment.
async fn adjust(
    pool: &AnyPool,
    table: &BarrierTable,
    barrier: &mut BranchBarrier,
    delta: i64,
) -> BarrierOutcome {
    barrier
        .call_with_pool(table, pool, move |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE user_account SET balance = balance + ? WHERE user_id = 1")
                    .bind(delta)
                    .execute(&mut *conn)
                    .await?;
                anyhow::Ok(())
            })
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn first_delivery_executes_and_duplicates_are_skipped() {
    let (pool, table) = participant().await;

    let outcome = adjust(&pool, &table, &mut barrier("dup", BranchOp::Action), -30).await;
    assert_eq!(outcome, BarrierOutcome::Executed);
    let outcome = adjust(&pool, &table, &mut barrier("dup", BranchOp::Action), -30).await;
    assert_eq!(outcome, BarrierOutcome::Duplicate);

    assert_eq!(balance(&pool).await, START_BALANCE - 30);
}

#[tokio::test]
async fn compensation_after_action_restores_balance_once() {
    let (pool, table) = participant().await;

    adjust(&pool, &table, &mut barrier("undo", BranchOp::Action), -30).await;
    let first = adjust(&pool, &table, &mut barrier("undo", BranchOp::Compensate), 30).await;
    let again = adjust(&pool, &table, &mut barrier("undo", BranchOp::Compensate), 30).await;

    assert_eq!(first, BarrierOutcome::Executed);
    assert_eq!(again, BarrierOutcome::Duplicate);
    assert_eq!(balance(&pool).await, START_BALANCE);
}

#[tokio::test]
async fn null_compensation_skips_body_and_records_marker() {
    let (pool, table) = participant().await;

    let outcome = adjust(&pool, &table, &mut barrier("null", BranchOp::Compensate), 30).await;
    assert_eq!(outcome, BarrierOutcome::NullCompensation);
    assert_eq!(balance(&pool).await, START_BALANCE);

    // The forward slot is now occupied by a row whose reason is the compensation.
    assert_eq!(
        barrier_rows(&pool, "null").await,
        vec![
            ("action".to_string(), "compensate".to_string()),
            ("compensate".to_string(), "compensate".to_string()),
        ]
    );
}

#[tokio::test]
async fn late_action_after_compensation_is_suspended() {
    let (pool, table) = participant().await;

    adjust(&pool, &table, &mut barrier("hang", BranchOp::Compensate), 30).await;
    let outcome = adjust(&pool, &table, &mut barrier("hang", BranchOp::Action), -30).await;

    assert_eq!(outcome, BarrierOutcome::Suspended);
    assert!(outcome.is_skipped());
    assert_eq!(balance(&pool).await, START_BALANCE);
}

#[tokio::test]
async fn tcc_cancel_without_try_is_a_null_compensation() {
    let (pool, table) = participant().await;
    let mut cancel = BranchBarrier::new(TransProtocol::Tcc, Gid::new("tcc").unwrap(), "02", BranchOp::Cancel);
    let outcome = adjust(&pool, &table, &mut cancel, 30).await;
    assert_eq!(outcome, BarrierOutcome::NullCompensation);

    let mut late_try = BranchBarrier::new(TransProtocol::Tcc, Gid::new("tcc").unwrap(), "02", BranchOp::Try);
    assert_eq!(adjust(&pool, &table, &mut late_try, -30).await, BarrierOutcome::Suspended);
    assert_eq!(balance(&pool).await, START_BALANCE);
}

#[tokio::test]
async fn business_error_rolls_back_barrier_rows() {
    let (pool, table) = participant().await;

    let err = barrier("fail", BranchOp::Action)
        .call_with_pool(&table, &pool, |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE user_account SET balance = balance - 30 WHERE user_id = 1")
                    .execute(&mut *conn)
                    .await?;
                Err::<(), _>(anyhow::anyhow!("insufficient balance"))
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BarrierError::Business(_)));
    assert_eq!(balance(&pool).await, START_BALANCE);
    assert!(barrier_rows(&pool, "fail").await.is_empty());

    // The retry is a first delivery, not a duplicate.
    let outcome = adjust(&pool, &table, &mut barrier("fail", BranchOp::Action), -30).await;
    assert_eq!(outcome, BarrierOutcome::Executed);
    assert_eq!(balance(&pool).await, START_BALANCE - 30);
}

#[tokio::test]
async fn sub_barriers_guard_each_step_of_one_handler() {
    let (pool, table) = participant().await;

    let mut first = barrier("multi", BranchOp::Action);
    assert_eq!(adjust(&pool, &table, &mut first, -10).await, BarrierOutcome::Executed);
    assert_eq!(adjust(&pool, &table, &mut first, -20).await, BarrierOutcome::Executed);
    assert_eq!(first.barrier_id(), 2);

    let mut redelivered = barrier("multi", BranchOp::Action);
    assert_eq!(adjust(&pool, &table, &mut redelivered, -10).await, BarrierOutcome::Duplicate);
    assert_eq!(adjust(&pool, &table, &mut redelivered, -20).await, BarrierOutcome::Duplicate);

    assert_eq!(balance(&pool).await, START_BALANCE - 30);
}

#[tokio::test]
async fn call_joins_the_callers_transaction() {
    let (pool, table) = participant().await;
    let mut tx = pool.begin().await.unwrap();
    let outcome = barrier("outer", BranchOp::Action)
        .call(&table, &mut *tx, |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE user_account SET balance = 0 WHERE user_id = 1")
                    .execute(&mut *conn)
                    .await?;
                anyhow::Ok(())
            })
        })
        .await
        .unwrap();
    assert_eq!(outcome, BarrierOutcome::Executed);
    tx.rollback().await.unwrap();

    assert_eq!(balance(&pool).await, START_BALANCE);
    assert!(barrier_rows(&pool, "outer").await.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn repeated_deliveries_apply_once(deliveries in 1usize..8, amount in 1i64..50) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (executed, final_balance) = runtime.block_on(async {
            let (pool, table) = participant().await;
            let mut executed = 0;
            for _ in 0..deliveries {
                let outcome = adjust(&pool, &table, &mut barrier("prop", BranchOp::Action), -amount).await;
                if outcome == BarrierOutcome::Executed {
                    executed += 1;
                }
            }
            (executed, balance(&pool).await)
        });
        prop_assert_eq!(executed, 1);
        prop_assert_eq!(final_balance, START_BALANCE - amount);
    }
}
