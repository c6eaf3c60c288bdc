use std::time::SystemTime;

use poolgate_pool::{BindingUpsert, TerminalStatus, UsageRecord};
use poolgate_storage::{GatewayStore, SqlStorage};

async fn memory_storage() -> SqlStorage {
    let storage = SqlStorage::connect("sqlite::memory:").await.unwrap();
    storage.sync().await.unwrap();
    storage
}

fn record(account_id: i64, input: i64, output: i64) -> UsageRecord {
    UsageRecord {
        account_id,
        input_tokens: input,
        output_tokens: output,
        cost: 0.25,
        status: TerminalStatus::Completed,
        recorded_at: SystemTime::now(),
    }
}

#[tokio::test]
async fn upsert_account_is_idempotent_by_label() {
    let storage = memory_storage().await;

    let first = storage.upsert_account("acct-a", "tok-1", false).await.unwrap();
    let second = storage.upsert_account("acct-a", "tok-2", true).await.unwrap();
    assert_eq!(first, second);

    let accounts = storage.load_accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].credential, "tok-2");
    assert!(accounts[0].disabled);
}

#[tokio::test]
async fn write_usage_updates_row_and_aggregate_together() {
    let storage = memory_storage().await;
    let id = storage.upsert_account("acct-a", "tok", false).await.unwrap();

    storage.write_usage(&record(id, 100, 40)).await.unwrap();
    storage.write_usage(&record(id, 50, 10)).await.unwrap();

    let accounts = storage.load_accounts().await.unwrap();
    let totals = &accounts[0].totals;
    assert_eq!(totals.rows, 2);
    assert_eq!(totals.input_tokens, 150);
    assert_eq!(totals.output_tokens, 50);

    // The derived aggregate and the primary rows always agree.
    let recomputed = storage.totals_from_rows(id).await.unwrap();
    assert_eq!(recomputed.rows, totals.rows);
    assert_eq!(recomputed.input_tokens, totals.input_tokens);
    assert_eq!(recomputed.output_tokens, totals.output_tokens);
}

#[tokio::test]
async fn totals_for_account_without_rows_are_zero() {
    let storage = memory_storage().await;
    let id = storage.upsert_account("acct-a", "tok", false).await.unwrap();

    let totals = storage.totals_from_rows(id).await.unwrap();
    assert_eq!(totals.rows, 0);
    assert_eq!(totals.input_tokens, 0);
    assert_eq!(totals.output_tokens, 0);
    assert_eq!(totals.cost, 0.0);
}

#[tokio::test]
async fn binding_upsert_converges_last_writer_wins() {
    let storage = memory_storage().await;
    let a = storage.upsert_account("acct-a", "tok", false).await.unwrap();
    let b = storage.upsert_account("acct-b", "tok", false).await.unwrap();

    let upsert = |account_id| BindingUpsert {
        session_key: "sess-1".to_string(),
        account_id,
        touched_at: SystemTime::now(),
    };
    storage.upsert_binding(&upsert(a)).await.unwrap();
    storage.upsert_binding(&upsert(b)).await.unwrap();

    let bindings = storage.load_bindings().await.unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].account_id, b);
}
