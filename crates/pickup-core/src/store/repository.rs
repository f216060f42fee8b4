//! Data access objects.
//!
//! Each method is exactly one transaction, opened at the isolation level that
//! matches its shape.

use super::{IsolationLevel, manager::TransactionManager, schema::Entity};
use crate::{
    Result,
    model::{Order, PackagingOption, Return, ReturnReason, Status},
};
use chrono::{DateTime, Utc};
use core::marker::PhantomData;
use sqlx::{Encode, Sqlite, Type};

/// Data access for one entity type.
pub struct Repository<T> {
    tm: TransactionManager,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            tm: self.tm.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(tm: TransactionManager) -> Self {
        Self {
            tm,
            _entity: PhantomData,
        }
    }

    pub async fn get(&self, id: i64) -> Result<T> {
        self.tm
            .run(
                IsolationLevel::RepeatableRead,
                &format!("get {} {id}", T::NAME),
                move |tx| Box::pin(async move { tx.require::<T>(id).await }),
            )
            .await
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        self.tm
            .run(
                IsolationLevel::RepeatableRead,
                &format!("check {} {id}", T::NAME),
                move |tx| Box::pin(async move { tx.exists::<T>(id).await }),
            )
            .await
    }

    /// Every row, in key order.
    pub async fn list(&self) -> Result<Vec<T>> {
        self.tm
            .run(
                IsolationLevel::Serializable,
                &format!("list {}", T::TABLE),
                |tx| Box::pin(async move { tx.scan::<T>().await }),
            )
            .await
    }

    /// Looks up a row by a unique column.
    pub async fn find_by<V>(&self, column: &'static str, value: V) -> Result<Option<T>>
    where
        V: for<'q> Encode<'q, Sqlite> + Type<Sqlite> + Send + 'static,
    {
        self.tm
            .run(
                IsolationLevel::RepeatableRead,
                &format!("find {} by {column}", T::NAME),
                move |tx| Box::pin(async move { tx.find_by::<T, V>(column, value).await }),
            )
            .await
    }

    /// Every row whose `column` equals `value`, in key order.
    pub async fn filter_by<V>(&self, column: &'static str, value: V) -> Result<Vec<T>>
    where
        V: for<'q> Encode<'q, Sqlite> + Type<Sqlite> + Send + 'static,
    {
        self.tm
            .run(
                IsolationLevel::Serializable,
                &format!("list {} by {column}", T::TABLE),
                move |tx| Box::pin(async move { tx.select_by::<T, V>(column, value).await }),
            )
            .await
    }
}

impl Repository<Order> {
    pub async fn by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        self.filter_by("user_id", user_id).await
    }

    /// Orders whose expiration date is before `now`, in key order.
    pub async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        self.tm
            .run(
                IsolationLevel::Serializable,
                "list expired orders",
                move |tx| {
                    Box::pin(async move {
                        Ok(sqlx::query_as::<_, Order>(
                            "SELECT * FROM orders WHERE expiration_date < ? ORDER BY order_id",
                        )
                        .bind(now)
                        .fetch_all(tx.connection())
                        .await?)
                    })
                },
            )
            .await
    }
}

impl Repository<Return> {
    pub async fn by_order(&self, order_id: i64) -> Result<Option<Return>> {
        self.find_by("order_id", order_id).await
    }

    pub async fn by_user(&self, user_id: i64) -> Result<Vec<Return>> {
        self.filter_by("user_id", user_id).await
    }
}

impl Repository<Status> {
    pub async fn by_name(&self, name: &str) -> Result<Option<Status>> {
        self.find_by("status_name", name.to_string()).await
    }
}

impl Repository<ReturnReason> {
    pub async fn by_reason(&self, reason: &str) -> Result<Option<ReturnReason>> {
        self.find_by("reason", reason.to_string()).await
    }
}

impl Repository<PackagingOption> {
    pub async fn by_kind(&self, kind: &str) -> Result<Option<PackagingOption>> {
        self.find_by("type", kind.to_string()).await
    }
}
