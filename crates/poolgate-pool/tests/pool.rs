use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use poolgate_pool::{Account, AccountPool, Availability, CredentialRef, LimitReason, SelectError};

fn account(id: i64) -> Account {
    Account {
        id,
        label: format!("acct-{id}"),
        credential: CredentialRef::new("tok"),
    }
}

#[tokio::test]
async fn rate_limited_recovers_via_queue() {
    let pool = AccountPool::new(Duration::from_secs(300));
    pool.insert(account(1)).await;

    pool.mark_rate_limited(1, Some(Duration::from_millis(50)), LimitReason::Quota)
        .await;
    assert!(matches!(
        pool.availability(1).await,
        Availability::RateLimited { .. }
    ));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(pool.availability(1).await.is_healthy());
}

#[tokio::test]
async fn rate_limit_holds_until_boundary() {
    let pool = AccountPool::new(Duration::from_secs(300));
    pool.insert(account(1)).await;

    pool.mark_rate_limited(1, Some(Duration::from_millis(150)), LimitReason::Quota)
        .await;

    // Strictly before the boundary the state holds, whatever anyone asks.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(
        pool.availability(1).await,
        Availability::RateLimited { .. }
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pool.availability(1).await.is_healthy());
}

#[tokio::test]
async fn no_explicit_boundary_falls_back_to_quota_window() {
    let pool = AccountPool::new(Duration::from_millis(80));
    pool.insert(account(1)).await;

    pool.mark_rate_limited(1, None, LimitReason::Quota).await;
    assert!(matches!(
        pool.availability(1).await,
        Availability::RateLimited { .. }
    ));

    tokio::time::sleep(Duration::from_millis(160)).await;
    assert!(pool.availability(1).await.is_healthy());
}

#[tokio::test]
async fn stale_queue_entry_does_not_recover_early() {
    let pool = AccountPool::new(Duration::from_secs(300));
    pool.insert(account(1)).await;

    pool.mark_rate_limited(1, Some(Duration::from_millis(80)), LimitReason::Quota)
        .await;
    pool.mark_rate_limited(1, Some(Duration::from_millis(250)), LimitReason::UpstreamError)
        .await;

    tokio::time::sleep(Duration::from_millis(140)).await;
    assert!(matches!(
        pool.availability(1).await,
        Availability::RateLimited { .. }
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pool.availability(1).await.is_healthy());
}

#[tokio::test]
async fn disabled_account_never_selected_or_resurrected() {
    let pool = AccountPool::new(Duration::from_secs(300));
    pool.insert(account(1)).await;
    pool.set_disabled(1, true).await;

    assert_eq!(
        pool.select(&HashSet::new()).await.unwrap_err(),
        SelectError::NoneAvailable
    );

    // A quota signal on a disabled account must not schedule a recovery.
    pool.mark_rate_limited(1, Some(Duration::from_millis(30)), LimitReason::Quota)
        .await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(matches!(pool.availability(1).await, Availability::Disabled));
}

#[tokio::test]
async fn selection_excludes_rate_limited_accounts() {
    let pool = Arc::new(AccountPool::new(Duration::from_secs(300)));
    pool.insert(account(1)).await;
    pool.insert(account(2)).await;

    pool.mark_rate_limited(1, Some(Duration::from_secs(60)), LimitReason::Quota)
        .await;
    for _ in 0..4 {
        assert_eq!(pool.select(&HashSet::new()).await.unwrap().id, 2);
    }
}
