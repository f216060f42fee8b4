mod common;

use chrono::{Duration, Utc};
use common::{backend, events_of, order_for};
use pickup_core::{
    Error,
    cache::{CacheStore, keys},
    metrics::{CREATED, CREATED_RETURNS},
    model::{Order, reason, status},
    notify::Operation,
};

#[tokio::test]
async fn return_copies_the_order_and_flips_its_status() {
    let backend = backend().await;
    let order = order_for(&backend, "mallory").await;
    let services = backend.services();
    services.orders.issue_order(order.order_id).await.expect("issue");
    // Warm the keys the return must invalidate.
    services.orders.get_order(order.order_id).await.expect("warm");
    services.returns.get_returns().await.expect("warm");

    let ret = services
        .returns
        .create_return(order.order_id)
        .await
        .expect("return");
    assert_eq!(ret.order_id, order.order_id);
    assert_eq!(ret.user_id, order.user_id);
    assert_eq!(ret.total_cost, order.total_cost);
    assert_eq!(ret.packaging_id, order.packaging_id);
    assert_eq!(
        services.reasons.get_reason(ret.reason_id).await.expect("reason").reason,
        reason::CUSTOMER_RETURN
    );

    let store = backend.cache_store();
    assert!(store.get(&keys::order(order.order_id)).await.expect("cache").is_none());
    assert!(store.get(keys::ALL_RETURNS).await.expect("cache").is_none());

    let order = services.orders.get_order(order.order_id).await.expect("order");
    assert_eq!(
        services.statuses.status_name(order.status_id).await.expect("status"),
        status::RETURN
    );
    assert_eq!(
        services
            .returns
            .get_return_by_order(order.order_id)
            .await
            .expect("by order"),
        ret
    );
    assert_eq!(
        services
            .returns
            .get_returns_by_user(order.user_id)
            .await
            .expect("by user"),
        vec![ret]
    );
    assert_eq!(events_of(&backend, Operation::CreateReturn).len(), 1);
    assert_eq!(backend.metrics().count(CREATED_RETURNS, CREATED), 1);
}

#[tokio::test]
async fn return_window_closes_after_two_days() {
    let backend = backend().await;
    let order = order_for(&backend, "niaj").await;
    let services = backend.services();
    let issued = services.orders.issue_order(order.order_id).await.expect("issue");
    services
        .orders
        .update_order(Order {
            issue_date: Some(Utc::now() - Duration::hours(49)),
            ..issued
        })
        .await
        .expect("backdate");

    let err = services
        .returns
        .create_return(order.order_id)
        .await
        .expect_err("too late");
    assert!(matches!(err.root(), Error::ReturnWindowClosed { .. }), "{err}");

    // Nothing was written and the order keeps its status.
    assert!(services.returns.get_returns().await.expect("returns").is_empty());
    let order = services.orders.get_order(order.order_id).await.expect("order");
    assert_eq!(
        services.statuses.status_name(order.status_id).await.expect("status"),
        status::ISSUED
    );
}

#[tokio::test]
async fn an_order_is_returned_once() {
    let backend = backend().await;
    let order = order_for(&backend, "olivia").await;
    let services = backend.services();
    services.orders.issue_order(order.order_id).await.expect("issue");
    services
        .returns
        .create_return(order.order_id)
        .await
        .expect("first return");

    let err = services
        .returns
        .create_return(order.order_id)
        .await
        .expect_err("second return");
    assert!(matches!(err.root(), Error::ConstraintViolation { .. }), "{err}");
    assert_eq!(services.returns.get_returns().await.expect("returns").len(), 1);
}

#[tokio::test]
async fn processed_return_is_terminal() {
    let backend = backend().await;
    let order = order_for(&backend, "peggy").await;
    let services = backend.services();
    services.orders.issue_order(order.order_id).await.expect("issue");
    services
        .returns
        .create_return(order.order_id)
        .await
        .expect("return");
    services
        .returns
        .get_return_by_order(order.order_id)
        .await
        .expect("warm");

    let processed = services
        .returns
        .process_return(order.order_id)
        .await
        .expect("process");
    assert_eq!(
        services.statuses.status_name(processed.status_id).await.expect("status"),
        status::HANDED_TO_COURIER
    );
    assert_eq!(
        services
            .returns
            .get_return_by_order(order.order_id)
            .await
            .expect("fresh read"),
        processed
    );

    let err = services
        .returns
        .process_return(order.order_id)
        .await
        .expect_err("already with the courier");
    assert!(matches!(err.root(), Error::InvalidRequest { .. }), "{err}");
    assert_eq!(events_of(&backend, Operation::ProcessReturn).len(), 1);
}

#[tokio::test]
async fn deleting_a_return_frees_the_order() {
    let backend = backend().await;
    let order = order_for(&backend, "rupert").await;
    let services = backend.services();
    services.orders.issue_order(order.order_id).await.expect("issue");
    let ret = services
        .returns
        .create_return(order.order_id)
        .await
        .expect("return");

    let err = services
        .orders
        .delete_order(order.order_id)
        .await
        .expect_err("return references the order");
    assert!(matches!(err.root(), Error::ConstraintViolation { .. }), "{err}");

    services.returns.delete_return(ret.return_id).await.expect("delete return");
    let err = services
        .returns
        .get_return_by_order(order.order_id)
        .await
        .expect_err("gone");
    assert!(err.is_not_found(), "{err}");
    services.orders.delete_order(order.order_id).await.expect("delete order");
    assert_eq!(events_of(&backend, Operation::DeleteReturn).len(), 1);
}
