use super::*;
use crate::test_support::{account, contact, memory_cache, StubRemote};

async fn manager_with(
    remote: Arc<StubRemote>,
    cache: ConversationCache,
    default_account: &str,
) -> (SessionManager, Arc<ReconciliationEngine>) {
    let engine = Arc::new(ReconciliationEngine::new(remote, cache.clone()));
    let manager = SessionManager::restore(engine.clone(), cache, AccountId::from(default_account)).await;
    (manager, engine)
}

#[tokio::test]
async fn restore_prefers_last_active_account() {
    let (cache, _) = memory_cache();
    let (manager, _) = manager_with(StubRemote::new(), cache.clone(), "main").await;
    assert_eq!(manager.active_account_id().await, AccountId::from("main"));
    assert_eq!(cache.last_active_account().await, Some(AccountId::from("main")));

    cache
        .remember_active_account(&AccountId::from("secondary"))
        .await;
    let (manager, _) = manager_with(StubRemote::new(), cache, "main").await;
    assert_eq!(manager.active_account_id().await, AccountId::from("secondary"));
    assert_eq!(manager.active_contact().await, None);
}

#[tokio::test]
async fn selecting_unknown_contact_is_not_found() {
    let (cache, _) = memory_cache();
    let main = AccountId::from("main");
    cache
        .store_contacts(&main, &[contact("Alice", "15551234567", 0)])
        .await;
    let (manager, engine) = manager_with(StubRemote::new(), cache, "main").await;
    engine.load_cached_view(&main).await;

    let err = manager
        .select_contact(&PhoneKey::normalize("15550000000"))
        .await
        .expect_err("unknown");
    assert!(matches!(err, ClientError::NotFound(_)));
    assert_eq!(manager.active_contact().await, None);

    let alice = PhoneKey::normalize("+1 555 123 4567");
    assert_eq!(manager.select_contact(&alice).await.expect("select"), main);
    assert!(manager.is_active_contact(&main, &alice).await);
    assert!(!manager.is_active_contact(&AccountId::from("secondary"), &alice).await);
}

#[tokio::test]
async fn switching_to_same_account_is_a_no_op() {
    let (cache, _) = memory_cache();
    let (manager, engine) = manager_with(StubRemote::new(), cache, "main").await;
    engine.load_cached_view(&AccountId::from("main")).await;

    let outcome = manager
        .switch_account(&AccountId::from("main"))
        .await
        .expect("switch");
    assert!(matches!(outcome, SwitchOutcome::Unchanged));
}

#[tokio::test]
async fn switching_to_unlisted_account_is_not_found() {
    let (cache, _) = memory_cache();
    let (manager, engine) = manager_with(StubRemote::new(), cache.clone(), "main").await;
    engine.load_cached_view(&AccountId::from("main")).await;
    manager
        .set_accounts(vec![account("main", "Main"), account("secondary", "Secondary")])
        .await;

    let err = manager
        .switch_account(&AccountId::from("ghost"))
        .await
        .err()
        .expect("unlisted account");
    assert!(matches!(err, ClientError::NotFound(_)));
    assert_eq!(manager.active_account_id().await, AccountId::from("main"));
    assert_eq!(cache.last_active_account().await, Some(AccountId::from("main")));
}

#[tokio::test]
async fn switch_persists_old_view_and_reconciles_new_account() {
    let remote = StubRemote::new();
    remote.set_contacts(
        "secondary",
        Ok(vec![contact("Dana", "15552223333", 4)]),
    );
    let (cache, _) = memory_cache();
    let main = AccountId::from("main");
    let secondary = AccountId::from("secondary");
    cache
        .store_contacts(&secondary, &[contact("Cached Eve", "15554445555", 0)])
        .await;
    let (manager, engine) = manager_with(remote, cache.clone(), "main").await;
    engine.load_cached_view(&main).await;
    engine.add_contact("Alice", "15551234567").await.expect("add");
    manager
        .select_contact(&PhoneKey::normalize("15551234567"))
        .await
        .expect("select");

    let outcome = manager.switch_account(&secondary).await.expect("switch");
    let SwitchOutcome::Switched {
        previous,
        provisional,
        reconcile,
    } = outcome
    else {
        panic!("expected a switch");
    };

    assert_eq!(previous, main);
    assert_eq!(provisional.len(), 1);
    assert_eq!(provisional[0].name, "Cached Eve");
    assert_eq!(manager.active_account_id().await, secondary);
    assert_eq!(manager.active_contact().await, None);
    assert_eq!(cache.last_active_account().await, Some(secondary.clone()));
    assert_eq!(cache.load_contacts(&main).await[0].name, "Alice");

    let BootstrapOutcome::Reconciled { contacts } = reconcile.await.expect("join") else {
        panic!("expected reconciliation");
    };
    let names: Vec<&str> = contacts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Dana", "Cached Eve"]);
    assert_eq!(engine.contacts().await, contacts);
}

#[tokio::test]
async fn failed_reconcile_leaves_provisional_view() {
    let remote = StubRemote::new();
    remote.set_contacts("secondary", Err(ClientError::Network("offline".into())));
    let (cache, _) = memory_cache();
    let secondary = AccountId::from("secondary");
    cache
        .store_contacts(&secondary, &[contact("Cached Eve", "15554445555", 0)])
        .await;
    let (manager, engine) = manager_with(remote, cache, "main").await;
    engine.load_cached_view(&AccountId::from("main")).await;

    let SwitchOutcome::Switched {
        provisional,
        reconcile,
        ..
    } = manager.switch_account(&secondary).await.expect("switch")
    else {
        panic!("expected a switch");
    };

    let outcome = reconcile.await.expect("join");
    assert!(matches!(outcome, BootstrapOutcome::CacheOnly { .. }));
    assert_eq!(engine.contacts().await, provisional);
    assert_eq!(engine.active_account().await, Some(secondary));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn selection_racing_a_switch_never_points_at_foreign_contact() {
    let main = AccountId::from("main");
    let secondary = AccountId::from("secondary");
    let alice = PhoneKey::normalize("15551234567");

    for _ in 0..50 {
        let (cache, _) = memory_cache();
        cache
            .store_contacts(&main, &[contact("Alice", "15551234567", 0)])
            .await;
        let (manager, engine) = manager_with(StubRemote::new(), cache, "main").await;
        engine.load_cached_view(&main).await;

        let (selected, switched) = tokio::join!(
            manager.select_contact(&alice),
            manager.switch_account(&secondary)
        );
        if let Ok(SwitchOutcome::Switched { reconcile, .. }) = switched {
            reconcile.abort();
        }

        assert_eq!(manager.active_account_id().await, secondary);
        assert_eq!(manager.active_contact().await, None);
        if selected.is_err() {
            assert!(!engine.has_contact(&alice).await);
        }
    }
}
