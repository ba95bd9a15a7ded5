//! From an authenticated principal to a tenant store handle.

mod common;

use chrono::Utc;
use common::*;
use fintrack_store::{
    resolve_tenant_handle, tenant_context, QueryWindow, ResolutionError, StoreError,
};
use fintrack_types::{AccountId, AccountRole, EntryKind, NewLedgerEntry, Principal, TenantId};

fn principal(tenant: Option<TenantId>) -> Principal {
    Principal {
        account_id: AccountId::generate(),
        email: "ops@example.com".into(),
        role: AccountRole::Business,
        tenant_id: tenant,
    }
}

fn expense(amount: i64, author: AccountId) -> fintrack_types::LedgerEntry {
    NewLedgerEntry {
        kind: EntryKind::Expense,
        title: "Cloud hosting".into(),
        amount_minor: amount,
        category: "infrastructure".into(),
        description: None,
        occurred_at: None,
    }
    .into_entry(author, Utc::now())
    .unwrap()
}

#[tokio::test]
async fn principal_without_tenant_is_refused_without_connecting() {
    let (connector, registry) = memory_registry();
    let caller = principal(None);

    match resolve_tenant_handle(&registry, &caller).await {
        Err(ResolutionError::MissingTenant { account }) => assert_eq!(account, caller.account_id),
        other => panic!("expected MissingTenant, got {other:?}"),
    }
    assert_eq!(connector.connect_attempts(), 0);
    assert_eq!(registry.stats().await.live, 0);
}

#[tokio::test]
async fn unreachable_tenant_store_is_unavailable() {
    let (connector, registry) = memory_registry();
    connector.set_reachable(&address("acct_13"), false).await;

    let result = resolve_tenant_handle(&registry, &principal(Some(tenant("acct_13")))).await;
    assert!(matches!(
        result,
        Err(ResolutionError::Unavailable(StoreError::TenantConnection { .. }))
    ));
}

#[tokio::test]
async fn tenants_see_only_their_own_data() {
    let (_connector, registry) = memory_registry();
    let alice = tenant_context(&registry, principal(Some(tenant("acct_alice"))))
        .await
        .unwrap();
    let bob = tenant_context(&registry, principal(Some(tenant("acct_bob"))))
        .await
        .unwrap();
    assert_eq!(alice.handle.tenant(), alice.principal.tenant_id.as_ref().unwrap());

    alice
        .handle
        .record_entry(expense(4_200, alice.principal.account_id))
        .await
        .unwrap();

    assert_eq!(alice.handle.totals().await.unwrap().expense_minor, 4_200);
    assert_eq!(bob.handle.totals().await.unwrap().entries, 0);
    assert!(bob
        .handle
        .list_entries(None, QueryWindow::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn failing_operation_evicts_its_connection() {
    let (connector, registry) = memory_registry();
    let caller = principal(Some(tenant("acct_21")));
    let handle = resolve_tenant_handle(&registry, &caller).await.unwrap();

    handle.connection().disconnect();
    match handle.totals().await {
        Err(StoreError::TenantConnection { tenant: t, .. }) => assert_eq!(t, tenant("acct_21")),
        other => panic!("expected a tenant connection error, got {other:?}"),
    }
    assert!(!registry.is_cached(handle.tenant()).await);

    let fresh = resolve_tenant_handle(&registry, &caller).await.unwrap();
    assert_eq!(fresh.totals().await.unwrap().entries, 0);
    assert_eq!(connector.connect_attempts(), 2);
}
