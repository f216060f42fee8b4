#![allow(dead_code)]

use chrono::{Duration, Utc};
use core::ops::Deref;
use pickup_core::{
    Backend, BackendConfig,
    model::{NewOrder, Order},
    notify::{ChangeEvent, DEFAULT_TOPIC, Operation},
};
use tempfile::TempDir;

/// A seeded backend over a database in its own temporary directory.
pub struct TestBackend {
    backend: Backend,
    _dir: TempDir,
}

impl Deref for TestBackend {
    type Target = Backend;

    fn deref(&self) -> &Backend {
        &self.backend
    }
}

pub fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("pickup.db").display())
}

pub async fn backend() -> TestBackend {
    backend_with(BackendConfig::default()).await
}

/// Like [`backend`], but with `config`. The database URL is replaced.
pub async fn backend_with(mut config: BackendConfig) -> TestBackend {
    let dir = tempfile::tempdir().expect("tempdir");
    config.pool.url = database_url(&dir);
    let backend = Backend::connect(config).await.expect("backend");
    backend.seed().await.expect("seed");
    TestBackend { backend, _dir: dir }
}

pub fn new_order(user_id: i64, packaging_id: i64, weight: f64) -> NewOrder {
    NewOrder {
        user_id,
        expiration_date: Utc::now() + Duration::days(7),
        weight,
        base_cost: 100.0,
        packaging_id,
        with_film: false,
    }
}

/// Creates a user and a week-long order for it in a bag.
pub async fn order_for(backend: &Backend, username: &str) -> Order {
    let services = backend.services();
    let user = services.users.create_user(username).await.expect("user");
    let bag = services
        .packaging
        .packaging_by_type("Пакет")
        .await
        .expect("bag");
    services
        .orders
        .create_order(new_order(user.user_id, bag.packaging_id, 2.0))
        .await
        .expect("order")
}

/// Moves the expiration date of `order` into the past.
pub async fn expire(backend: &Backend, order: &Order, days: i64) -> Order {
    backend
        .services()
        .orders
        .update_order(Order {
            expiration_date: Utc::now() - Duration::days(days),
            ..order.clone()
        })
        .await
        .expect("expire order")
}

pub fn events(backend: &Backend) -> Vec<ChangeEvent> {
    backend
        .event_log()
        .records(DEFAULT_TOPIC)
        .iter()
        .map(|record| ChangeEvent::decode(&record.payload).expect("event"))
        .collect()
}

pub fn events_of(backend: &Backend, operation: Operation) -> Vec<ChangeEvent> {
    events(backend)
        .into_iter()
        .filter(|event| event.operation == operation)
        .collect()
}
