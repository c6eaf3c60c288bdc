use std::sync::Arc;
use std::time::Duration;

use poolgate_pool::{
    Account, AccountPool, CredentialRef, LimitReason, NoopSink, SelectError, StickyRouter,
};

async fn pool_with_accounts(ids: &[i64]) -> Arc<AccountPool> {
    let pool = Arc::new(AccountPool::new(Duration::from_secs(300)));
    for id in ids {
        pool.insert(Account {
            id: *id,
            label: format!("acct-{id}"),
            credential: CredentialRef::new("tok"),
        })
        .await;
    }
    pool
}

#[tokio::test]
async fn session_pins_to_one_account_within_ttl() {
    let pool = pool_with_accounts(&[1, 2, 3]).await;
    let router = StickyRouter::new(pool, Arc::new(NoopSink), Duration::from_secs(60));

    let first = router.resolve(Some("sess-a")).await.unwrap();
    for _ in 0..5 {
        let again = router.resolve(Some("sess-a")).await.unwrap();
        assert_eq!(again.id, first.id);
    }
}

#[tokio::test]
async fn hit_refreshes_ttl() {
    let pool = pool_with_accounts(&[1, 2]).await;
    let router = StickyRouter::new(pool, Arc::new(NoopSink), Duration::from_millis(100));

    let first = router.resolve(Some("sess-a")).await.unwrap();
    // Keep touching inside the window; the binding must outlive several
    // TTL-lengths' worth of wall time as long as hits keep landing.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let again = router.resolve(Some("sess-a")).await.unwrap();
        assert_eq!(again.id, first.id);
    }
}

#[tokio::test]
async fn expired_binding_is_replaced() {
    let pool = pool_with_accounts(&[1]).await;
    let router = StickyRouter::new(pool.clone(), Arc::new(NoopSink), Duration::from_millis(40));

    router.resolve(Some("sess-a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(90)).await;
    assert_eq!(router.bound_account("sess-a").await, Some(1));

    // The stale binding is evicted on read and re-created fresh.
    router.resolve(Some("sess-a")).await.unwrap();
    assert_eq!(router.bound_account("sess-a").await, Some(1));
}

#[tokio::test]
async fn unhealthy_account_falls_through_to_pool() {
    let pool = pool_with_accounts(&[1, 2]).await;
    let router = StickyRouter::new(pool.clone(), Arc::new(NoopSink), Duration::from_secs(60));

    let pinned = router.resolve(Some("sess-a")).await.unwrap();
    pool.mark_rate_limited(pinned.id, Some(Duration::from_secs(60)), LimitReason::Quota)
        .await;

    let replacement = router.resolve(Some("sess-a")).await.unwrap();
    assert_ne!(replacement.id, pinned.id);
    // The binding now points at the replacement, not the stale account.
    assert_eq!(router.bound_account("sess-a").await, Some(replacement.id));
}

#[tokio::test]
async fn no_accounts_surfaces_select_error() {
    let pool = Arc::new(AccountPool::new(Duration::from_secs(300)));
    let router = StickyRouter::new(pool, Arc::new(NoopSink), Duration::from_secs(60));
    assert_eq!(
        router.resolve(Some("sess-a")).await.unwrap_err(),
        SelectError::NoneAvailable
    );
}

#[tokio::test]
async fn sessionless_requests_use_plain_selection() {
    let pool = pool_with_accounts(&[1]).await;
    let router = StickyRouter::new(pool, Arc::new(NoopSink), Duration::from_secs(60));
    let account = router.resolve(None).await.unwrap();
    assert_eq!(account.id, 1);
}
