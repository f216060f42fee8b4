mod common;

use chrono::{Duration, Utc};
use common::{backend, backend_with, events_of, expire, new_order, order_for};
use pickup_core::{
    BackendConfig, Error,
    cache::{CacheStore, keys},
    metrics::{ISSUED, ISSUED_ORDERS},
    model::{NewOrder, Order, status},
    notify::Operation,
    scheduler::SchedulerConfig,
    store::{IsolationLevel, PoolConfig},
};

#[tokio::test]
async fn create_order_prices_packaging_and_sets_created_status() {
    let backend = backend().await;
    let services = backend.services();
    let user = services.users.create_user("bob").await.expect("user");
    let bag = services.packaging.packaging_by_type("Пакет").await.expect("bag");

    let order = services
        .orders
        .create_order(new_order(user.user_id, bag.packaging_id, 3.0))
        .await
        .expect("plain");
    assert_eq!(order.packaging_cost, 5.0);
    assert_eq!(order.total_cost, 105.0);
    assert_eq!(
        services.statuses.status_name(order.status_id).await.expect("status"),
        status::CREATED
    );

    let filmed = services
        .orders
        .create_order(NewOrder {
            with_film: true,
            ..new_order(user.user_id, bag.packaging_id, 3.0)
        })
        .await
        .expect("filmed");
    assert_eq!(filmed.packaging_cost, 6.0);
    assert_eq!(filmed.total_cost, 106.0);

    let created = events_of(&backend, Operation::Create);
    assert!(
        created
            .iter()
            .any(|e| e.description == format!("Order {} created", order.order_id))
    );
}

#[tokio::test]
async fn create_order_validates_weight_and_expiration() {
    let backend = backend().await;
    let services = backend.services();
    let user = services.users.create_user("carol").await.expect("user");
    let bag = services.packaging.packaging_by_type("Пакет").await.expect("bag");
    let film = services.packaging.packaging_by_type("Пленка").await.expect("film");

    let err = services
        .orders
        .create_order(new_order(user.user_id, bag.packaging_id, 15.0))
        .await
        .expect_err("too heavy for a bag");
    assert!(matches!(err.root(), Error::WeightExceeded { .. }), "{err}");

    // Film carries any weight.
    services
        .orders
        .create_order(new_order(user.user_id, film.packaging_id, 150.0))
        .await
        .expect("film has no limit");

    let err = services
        .orders
        .create_order(NewOrder {
            expiration_date: Utc::now() - Duration::hours(1),
            ..new_order(user.user_id, bag.packaging_id, 1.0)
        })
        .await
        .expect_err("expired on arrival");
    assert!(matches!(err.root(), Error::ExpirationInPast), "{err}");

    let err = services
        .orders
        .create_order(new_order(9_999, bag.packaging_id, 1.0))
        .await
        .expect_err("unknown user");
    assert!(err.is_not_found(), "{err}");

    // Every rejected mutation is reported on the event topic.
    let reports = events_of(&backend, Operation::Error);
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|e| e.description.starts_with("Error: create: ")));
}

#[tokio::test]
async fn second_read_is_served_from_cache() {
    let backend = backend().await;
    let order = order_for(&backend, "dave").await;
    let orders = &backend.services().orders;

    let first = orders.get_order(order.order_id).await.expect("first read");
    assert!(
        backend
            .cache_store()
            .get(&keys::order(order.order_id))
            .await
            .expect("cache")
            .is_some()
    );

    // Change the row behind the cache's back.
    let changed = Order {
        weight: 9.0,
        ..first.clone()
    };
    backend
        .context()
        .transactions
        .run(IsolationLevel::ReadCommitted, "direct update", move |tx| {
            Box::pin(async move { tx.update(&changed).await })
        })
        .await
        .expect("direct update");

    let second = orders.get_order(order.order_id).await.expect("second read");
    assert_eq!(second, first, "second read must come from the cache");
}

#[tokio::test]
async fn mutations_invalidate_every_key_holding_the_order() {
    let backend = backend().await;
    let order = order_for(&backend, "erin").await;
    let orders = &backend.services().orders;

    orders.get_order(order.order_id).await.expect("warm order");
    orders.get_orders().await.expect("warm all");
    orders
        .get_orders_by_user(order.user_id)
        .await
        .expect("warm user");
    let store = backend.cache_store();
    for key in keys::order_keys(order.order_id, order.user_id) {
        assert!(store.get(&key).await.expect("cache").is_some(), "{key} warm");
    }

    let updated = orders
        .update_order(Order {
            weight: 4.0,
            ..order.clone()
        })
        .await
        .expect("update");

    for key in keys::order_keys(order.order_id, order.user_id) {
        assert!(store.get(&key).await.expect("cache").is_none(), "{key} stale");
    }
    assert_eq!(orders.get_order(order.order_id).await.expect("read"), updated);
    assert_eq!(orders.get_orders().await.expect("all"), vec![updated]);
}

#[tokio::test]
async fn moving_an_order_invalidates_both_users() {
    let backend = backend().await;
    let order = order_for(&backend, "frank").await;
    let other = backend
        .services()
        .users
        .create_user("grace")
        .await
        .expect("user");
    let orders = &backend.services().orders;

    assert_eq!(orders.get_orders_by_user(order.user_id).await.expect("warm").len(), 1);
    assert!(orders.get_orders_by_user(other.user_id).await.expect("warm").is_empty());

    orders
        .update_order(Order {
            user_id: other.user_id,
            ..order.clone()
        })
        .await
        .expect("move");

    assert!(orders.get_orders_by_user(order.user_id).await.expect("old").is_empty());
    assert_eq!(orders.get_orders_by_user(other.user_id).await.expect("new").len(), 1);
}

#[tokio::test]
async fn double_issue_fails_and_keeps_the_first_issue_date() {
    let backend = backend().await;
    let order = order_for(&backend, "heidi").await;
    let orders = &backend.services().orders;

    let issued = orders.issue_order(order.order_id).await.expect("first issue");
    let issue_date = issued.issue_date.expect("issue date set");
    assert_eq!(
        backend
            .services()
            .statuses
            .status_name(issued.status_id)
            .await
            .expect("status"),
        status::ISSUED
    );

    let err = orders
        .issue_order(order.order_id)
        .await
        .expect_err("second issue");
    assert!(matches!(err.root(), Error::AlreadyIssued { .. }), "{err}");
    assert_eq!(
        orders.get_order(order.order_id).await.expect("read").issue_date,
        Some(issue_date)
    );
    assert_eq!(events_of(&backend, Operation::Issue).len(), 1);
    assert_eq!(backend.metrics().count(ISSUED_ORDERS, ISSUED), 1);
}

#[tokio::test]
async fn expired_storage_cannot_be_issued() {
    let backend = backend().await;
    let order = order_for(&backend, "ivan").await;
    let order = expire(&backend, &order, 2).await;

    let err = backend
        .services()
        .orders
        .issue_order(order.order_id)
        .await
        .expect_err("storage expired");
    assert!(matches!(err.root(), Error::StorageExpired { .. }), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issues_hand_out_the_order_once() {
    let backend = backend_with(BackendConfig {
        scheduler: SchedulerConfig::new(4),
        ..BackendConfig::default()
    })
    .await;
    let order_id = order_for(&backend, "judy").await.order_id;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let orders = backend.services().orders.clone();
            tokio::spawn(async move { orders.issue_order(order_id).await })
        })
        .collect();

    let mut issued = 0;
    for attempt in attempts {
        match attempt.await.expect("join") {
            Ok(_) => issued += 1,
            Err(e) => assert!(
                matches!(e.root(), Error::AlreadyIssued { .. }) || e.is_serialization_failure(),
                "{e}"
            ),
        }
    }
    assert_eq!(issued, 1);
}

#[tokio::test]
async fn failed_mutation_releases_its_connection() {
    let backend = backend_with(BackendConfig {
        pool: PoolConfig::default().max_connections(1),
        ..BackendConfig::default()
    })
    .await;
    let order = order_for(&backend, "ken").await;
    let services = backend.services();

    // Not issued yet: the transaction fails after reading the order.
    let err = services
        .returns
        .create_return(order.order_id)
        .await
        .expect_err("not issued");
    assert!(matches!(err.root(), Error::NotIssued { .. }), "{err}");

    // With a single connection, this only works if it was released.
    services.orders.issue_order(order.order_id).await.expect("issue");
    assert!(services.returns.get_returns().await.expect("returns").is_empty());
}

#[tokio::test]
async fn delete_is_restricted_while_referenced() {
    let backend = backend().await;
    let order = order_for(&backend, "leo").await;
    let services = backend.services();

    let err = services
        .users
        .delete_user(order.user_id)
        .await
        .expect_err("user still has an order");
    assert!(matches!(err.root(), Error::ConstraintViolation { .. }), "{err}");

    services.orders.delete_order(order.order_id).await.expect("delete order");
    services.users.delete_user(order.user_id).await.expect("delete user");
    assert!(!services.users.user_exists(order.user_id).await.expect("exists"));
    assert_eq!(events_of(&backend, Operation::Delete).len(), 2);
}
