use bizstore::bizstore::BizStore;
use bizstore::context::Context;
use bizstore::errors::ErrorKind;
use bizstore_int_test::test_util::{cleanup, create_test_context, run_test};
use std::time::Duration;

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_builder_reports_first_error() {
    let err = BizStore::builder()
        .initial_sequence(0)
        .counter_collection("")
        .open()
        .err()
        .unwrap();
    assert_eq!(err.kind(), &ErrorKind::Configuration);
    assert!(err.message().contains("Initial sequence"));
}

#[test]
fn test_unknown_scheme() {
    let err = BizStore::builder()
        .connection_string("mongodb://localhost:27017/biz")
        .open()
        .err()
        .unwrap();
    assert_eq!(err.kind(), &ErrorKind::Configuration);
}

#[test]
fn test_custom_settings() {
    let store = BizStore::builder()
        .counter_collection("counters")
        .initial_sequence(1000)
        .user_collection("members")
        .default_timeout(Duration::from_secs(2))
        .open()
        .unwrap();
    let ctx = store.context();
    assert!(ctx.remaining().unwrap() <= Duration::from_secs(2));

    assert_eq!(store.next_id(&ctx, "orders").unwrap(), 1000);
    let users = store.user_repository(&ctx).unwrap();
    assert_eq!(users.collection(), "members");
    assert_eq!(users.add_user(&ctx, "alice", "pw").unwrap().id, 1000);

    let names = store.gateway().list_collection_names(&ctx).unwrap();
    assert!(names.contains(&"counters".to_string()));
    assert!(!names.contains(&"ids".to_string()));

    assert!(store.config().set_initial_sequence(5).is_err());
    store.close().unwrap();
}

#[test]
fn test_closed_store() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            store.next_id(&context, "users")?;
            store.close()?;
            store.close()?;
            assert!(store.is_closed());

            let err = store.next_id(&context, "users").unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::StoreAlreadyClosed);
            assert!(store.user_repository(&context).is_err());
            let err = store
                .talk_repository()
                .get_pending_talk_infos(&context)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::StoreAlreadyClosed);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_state_survives_reopen() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            let users = store.user_repository(&context)?;
            users.add_user(&context, "alice", "pw")?;
            let talks = store.talk_repository();
            let talk_id = talks.create_talk(&context, &Default::default())?;
            for _ in 0..4 {
                store.next_id(&context, "orders")?;
            }
            store.close()?;

            let reopened = ctx.open_peer()?;
            let context = Context::with_timeout(Duration::from_secs(10));
            // memory stores vanish with their last gateway
            if cfg!(all(feature = "fjall", not(feature = "memory"))) {
                assert_eq!(reopened.next_id(&context, "orders")?, 5);

                let users = reopened.user_repository(&context)?;
                assert_eq!(users.get_user_by_user_name(&context, "alice")?.id, 1);
                let err = users.add_user(&context, "alice", "again").unwrap_err();
                assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);
                assert_eq!(users.add_user(&context, "bob", "pw")?.id, 3);

                let talks = reopened.talk_repository();
                let all = talks.query_talks(&context, &Default::default())?;
                assert_eq!(all.len(), 1);
                assert_eq!(all[0].talk_id, talk_id);
            }
            reopened.close()?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_counters_survive_many_reopens() {
    run_test(
        create_test_context,
        |ctx| {
            if !cfg!(all(feature = "fjall", not(feature = "memory"))) {
                return Ok(());
            }
            let mut store = ctx.store();
            let mut expected = 1;
            for _ in 0..5 {
                let context = store.context();
                for _ in 0..10 {
                    assert_eq!(store.next_id(&context, "users")?, expected);
                    expected += 1;
                }
                store.close()?;
                store = ctx.open_peer()?;
            }
            store.close()?;
            Ok(())
        },
        cleanup,
    )
}
