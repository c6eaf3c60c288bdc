use std::sync::Arc;
use std::time::Duration;

use poolgate_pool::{
    Account, AccountPool, AccountTotals, CostModel, CredentialRef, Ledger, NoopSink,
    TerminalStatus, UsageError, UsagePayload,
};

async fn ledger_with_accounts(ids: &[i64], capacity: i64) -> (Arc<AccountPool>, Arc<Ledger>) {
    let pool = Arc::new(AccountPool::new(Duration::from_secs(300)));
    for id in ids {
        pool.insert(Account {
            id: *id,
            label: format!("acct-{id}"),
            credential: CredentialRef::new("tok"),
        })
        .await;
    }
    let ledger = Arc::new(Ledger::new(
        pool.clone(),
        Arc::new(NoopSink),
        CostModel {
            input_per_mtok: 2.0,
            output_per_mtok: 8.0,
        },
        capacity,
    ));
    (pool, ledger)
}

#[tokio::test]
async fn negative_payload_rejected() {
    let (_pool, ledger) = ledger_with_accounts(&[1], 0).await;
    let err = ledger
        .record_usage(
            1,
            UsagePayload {
                input_tokens: -5,
                output_tokens: 10,
            },
            TerminalStatus::Completed,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UsageError::InvalidUsagePayload {
            field: "input_tokens",
            value: -5,
        }
    ));

    // Nothing was applied to the aggregate.
    let totals = ledger.totals(1).await;
    assert_eq!(totals.rows, 0);
    assert_eq!(totals.input_tokens, 0);
}

#[tokio::test]
async fn concurrent_record_usage_loses_nothing() {
    let (_pool, ledger) = ledger_with_accounts(&[1], 0).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                ledger
                    .record_usage(
                        1,
                        UsagePayload {
                            input_tokens: 1,
                            output_tokens: 1,
                        },
                        TerminalStatus::Completed,
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let totals = ledger.totals(1).await;
    assert_eq!(totals.rows, 32 * 25);
    assert_eq!(totals.input_tokens, 32 * 25);
    assert_eq!(totals.output_tokens, 32 * 25);
}

#[tokio::test]
async fn corrupted_cache_clamped_to_zero() {
    let (_pool, ledger) = ledger_with_accounts(&[1], 0).await;
    ledger
        .hydrate(
            1,
            AccountTotals {
                rows: 2,
                input_tokens: -3,
                output_tokens: 40,
                cost: -1.5,
            },
        )
        .await;

    let totals = ledger.totals(1).await;
    assert_eq!(totals.input_tokens, 0);
    assert_eq!(totals.output_tokens, 40);
    assert_eq!(totals.cost, 0.0);
}

#[tokio::test]
async fn zero_usage_account_reports_zero_consumed() {
    let pool = Arc::new(AccountPool::new(Duration::from_secs(300)));
    pool.insert(Account {
        id: 7,
        label: "fresh".to_string(),
        credential: CredentialRef::new("tok"),
    })
    .await;
    let ledger = Ledger::new(pool, Arc::new(NoopSink), CostModel::default(), 1_000_000);

    let summary = ledger.capacity_summary().await;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].used_percent, 0.0);
    assert_eq!(summary[0].input_tokens, 0);
    assert_eq!(summary[0].availability, "healthy");
}

#[tokio::test]
async fn reserve_tracks_availability() {
    let (pool, ledger) = ledger_with_accounts(&[1], 0).await;
    assert!(ledger.reserve(1).await);

    pool.mark_rate_limited(
        1,
        Some(Duration::from_secs(60)),
        poolgate_pool::LimitReason::Quota,
    )
    .await;
    assert!(!ledger.reserve(1).await);
    assert_eq!(ledger.availability(1).await.kind(), "rate_limited");

    // Unknown accounts are never reservable.
    assert!(!ledger.reserve(99).await);
}

#[tokio::test]
async fn cost_follows_price_model() {
    let (_pool, ledger) = ledger_with_accounts(&[1], 0).await;
    let record = ledger
        .record_usage(
            1,
            UsagePayload {
                input_tokens: 500_000,
                output_tokens: 250_000,
            },
            TerminalStatus::Completed,
        )
        .await
        .unwrap();
    // 0.5 Mtok * 2.0 + 0.25 Mtok * 8.0
    assert!((record.cost - 3.0).abs() < f64::EPSILON);
}
