//! Domain records stored in the relational store and cached as JSON.
//!
//! Every record carries an integer surrogate key assigned by the store on
//! insert. Foreign keys are plain ids; the store enforces that they resolve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status names installed by the reference seed.
pub mod status {
    pub const CREATED: &str = "Создан";
    pub const ISSUED: &str = "Выдан";
    pub const RETURN: &str = "Возврат";
    pub const HANDED_TO_COURIER: &str = "Передан курьеру";
}

/// Return reasons installed by the reference seed.
pub mod reason {
    pub const STORAGE_EXPIRED: &str = "Истек срок хранения";
    pub const CUSTOMER_RETURN: &str = "Вернул покупатель";
}

/// Packaging types installed by the reference seed.
pub mod packaging {
    pub const BAG: &str = "Пакет";
    pub const BOX: &str = "Коробка";
    pub const FILM: &str = "Пленка";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub order_id: i64,
    pub user_id: i64,
    pub acceptance_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub weight: f64,
    pub base_cost: f64,
    pub packaging_cost: f64,
    pub total_cost: f64,
    pub packaging_id: i64,
    pub status_id: i64,
    pub issue_date: Option<DateTime<Utc>>,
    pub with_film: bool,
}

/// Caller-supplied fields of a new order. Costs and status are derived.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: i64,
    pub expiration_date: DateTime<Utc>,
    pub weight: f64,
    pub base_cost: f64,
    pub packaging_id: i64,
    pub with_film: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PackagingOption {
    pub packaging_id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub cost: f64,
    pub max_weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Return {
    pub return_id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub return_date: DateTime<Utc>,
    pub reason_id: i64,
    pub base_cost: f64,
    pub packaging_cost: f64,
    pub packaging_id: i64,
    pub total_cost: f64,
    pub status_id: i64,
}

impl Return {
    /// Builds a return for `order`, copying its costs and packaging.
    pub fn for_order(order: &Order, reason_id: i64, status_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            return_id: 0,
            order_id: order.order_id,
            user_id: order.user_id,
            return_date: now,
            reason_id,
            base_cost: order.base_cost,
            packaging_cost: order.packaging_cost,
            packaging_id: order.packaging_id,
            total_cost: order.total_cost,
            status_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReturnReason {
    pub reason_id: i64,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Status {
    pub status_id: i64,
    pub status_name: String,
}
