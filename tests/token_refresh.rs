// tests/token_refresh.rs
//
// 单飞令牌刷新：每轮只发一次网络刷新，所有等待者共享同一结果。

mod common;

use common::{wait_until, CountingRefreshEndpoint};
use futures::future::join_all;
use rust_lib_photobackup::api::auth::{
    AuthSession, CredentialStore, MemoryCredentialStore, StoredCredentials, TokenRefreshCoordinator,
};
use rust_lib_photobackup::AuthError;
use std::sync::Arc;
use std::time::Duration;

fn store_with_refresh_token() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::new(Some(
        StoredCredentials::new("expired-access")
            .with_refresh_token("refresh-0")
            .with_expiry(0),
    )))
}

#[tokio::test]
async fn simultaneous_callers_share_one_refresh() {
    let store = store_with_refresh_token();
    let endpoint = CountingRefreshEndpoint::succeeding(Duration::from_millis(20));
    let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store.clone());

    let outcomes = join_all((0..10).map(|_| coordinator.handle_refresh())).await;

    assert_eq!(endpoint.calls(), 1);
    for outcome in outcomes {
        assert_eq!(outcome.unwrap(), "access-1");
    }
    let saved = store.load().await.unwrap();
    assert_eq!(saved.access_token, "access-1");
    assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
    assert!(!coordinator.is_refreshing());
    assert_eq!(coordinator.pending(), 0);
}

#[tokio::test]
async fn failed_refresh_rejects_every_waiter_and_clears_credentials() {
    let store = store_with_refresh_token();
    let rejection = AuthError::Rejected {
        error: "invalid_grant".to_string(),
        description: "refresh token expired".to_string(),
    };
    let endpoint = CountingRefreshEndpoint::failing(Duration::from_millis(10), rejection.clone());
    let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store.clone());

    let outcomes = join_all((0..10).map(|_| coordinator.handle_refresh())).await;

    assert_eq!(endpoint.calls(), 1);
    for outcome in outcomes {
        assert_eq!(outcome.unwrap_err(), rejection);
    }
    assert_eq!(store.load().await, None);
    assert!(!coordinator.is_refreshing());
}

#[tokio::test]
async fn missing_refresh_token_fails_without_calling_endpoint() {
    let store = Arc::new(MemoryCredentialStore::new(Some(StoredCredentials::new(
        "access-only",
    ))));
    let endpoint = CountingRefreshEndpoint::succeeding(Duration::ZERO);
    let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store.clone());

    let outcome = coordinator.handle_refresh().await;

    assert_eq!(outcome.unwrap_err(), AuthError::MissingRefreshToken);
    assert_eq!(endpoint.calls(), 0);
    assert_eq!(store.load().await, None);
}

#[tokio::test]
async fn sequential_cycles_each_refresh_once_with_rotated_token() {
    let store = store_with_refresh_token();
    let endpoint = CountingRefreshEndpoint::succeeding(Duration::from_millis(1));
    let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store.clone());

    assert_eq!(coordinator.handle_refresh().await.unwrap(), "access-1");
    assert_eq!(coordinator.handle_refresh().await.unwrap(), "access-2");

    assert_eq!(endpoint.calls(), 2);
    assert_eq!(
        *endpoint.seen_tokens.lock().unwrap(),
        ["refresh-0", "refresh-1"]
    );
}

#[tokio::test]
async fn late_caller_joins_refresh_in_flight() {
    let store = store_with_refresh_token();
    let endpoint = CountingRefreshEndpoint::succeeding(Duration::from_millis(30));
    let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store);

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.handle_refresh().await })
    };
    assert!(wait_until(Duration::from_secs(1), || coordinator.is_refreshing()).await);

    let late = coordinator.handle_refresh().await.unwrap();
    assert_eq!(late, "access-1");
    assert_eq!(first.await.unwrap().unwrap(), "access-1");
    assert_eq!(endpoint.calls(), 1);
}

#[tokio::test]
async fn dropping_the_initiating_caller_does_not_strand_other_waiters() {
    let store = store_with_refresh_token();
    let endpoint = CountingRefreshEndpoint::succeeding(Duration::from_millis(30));
    let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store);

    let initiator = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.handle_refresh().await })
    };
    assert!(wait_until(Duration::from_secs(1), || coordinator.is_refreshing()).await);
    initiator.abort();

    assert_eq!(coordinator.handle_refresh().await.unwrap(), "access-1");
    assert_eq!(endpoint.calls(), 1);
}

#[tokio::test]
async fn session_callers_with_expired_token_trigger_a_single_refresh() {
    let store = store_with_refresh_token();
    let endpoint = CountingRefreshEndpoint::succeeding(Duration::from_millis(20));
    let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store.clone());
    let session = AuthSession::new(store, coordinator);

    let tokens = join_all((0..8).map(|_| session.access_token())).await;

    assert!(tokens.into_iter().all(|t| t.unwrap() == "access-1"));
    assert_eq!(endpoint.calls(), 1);
    // 新令牌已缓存，下一位调用方不再刷新
    assert_eq!(session.access_token().await.unwrap(), "access-1");
    assert_eq!(endpoint.calls(), 1);
}
