use super::{
    IsolationLevel,
    schema::{Entity, insert_sql, update_sql},
};
use crate::{Error, Result};
use sqlx::{Encode, Sqlite, SqliteConnection, Type};

/// Statements inside one open database transaction.
///
/// Typed helpers cover the key-based statements every entity shares; anything
/// else runs as a plain `sqlx` query against [`Transaction::connection`].
/// A failed statement leaves the transaction open, so the caller decides
/// between rolling back and carrying on.
pub struct Transaction {
    inner: sqlx::Transaction<'static, Sqlite>,
    level: IsolationLevel,
}

impl Transaction {
    pub(crate) fn new(inner: sqlx::Transaction<'static, Sqlite>, level: IsolationLevel) -> Self {
        Self { inner, level }
    }

    pub(crate) fn into_inner(self) -> sqlx::Transaction<'static, Sqlite> {
        self.inner
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.inner
    }

    pub async fn get<T: Entity>(&mut self, id: i64) -> Result<Option<T>> {
        let sql = format!("SELECT * FROM {} WHERE {} = ?", T::TABLE, T::KEY);
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(self.connection())
            .await?;
        Ok(row)
    }

    /// Like [`Transaction::get`], but a missing row is [`Error::NotFound`].
    pub async fn require<T: Entity>(&mut self, id: i64) -> Result<T> {
        self.get(id).await?.ok_or(Error::NotFound {
            entity: T::NAME,
            id,
        })
    }

    pub async fn exists<T: Entity>(&mut self, id: i64) -> Result<bool> {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE {} = ?)", T::TABLE, T::KEY);
        let found: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(self.connection())
            .await?;
        Ok(found != 0)
    }

    /// Every row of `T`'s table, in key order.
    pub async fn scan<T: Entity>(&mut self) -> Result<Vec<T>> {
        let sql = format!("SELECT * FROM {} ORDER BY {}", T::TABLE, T::KEY);
        Ok(sqlx::query_as::<_, T>(&sql)
            .fetch_all(self.connection())
            .await?)
    }

    /// Every row whose `column` equals `value`, in key order.
    pub async fn select_by<T, V>(&mut self, column: &'static str, value: V) -> Result<Vec<T>>
    where
        T: Entity,
        V: for<'q> Encode<'q, Sqlite> + Type<Sqlite> + Send + 'static,
    {
        let sql = format!(
            "SELECT * FROM {} WHERE {column} = ? ORDER BY {}",
            T::TABLE,
            T::KEY
        );
        Ok(sqlx::query_as::<_, T>(&sql)
            .bind(value)
            .fetch_all(self.connection())
            .await?)
    }

    /// The first row whose `column` equals `value`. Meant for unique columns.
    pub async fn find_by<T, V>(&mut self, column: &'static str, value: V) -> Result<Option<T>>
    where
        T: Entity,
        V: for<'q> Encode<'q, Sqlite> + Type<Sqlite> + Send + 'static,
    {
        let sql = format!(
            "SELECT * FROM {} WHERE {column} = ? ORDER BY {} LIMIT 1",
            T::TABLE,
            T::KEY
        );
        Ok(sqlx::query_as::<_, T>(&sql)
            .bind(value)
            .fetch_optional(self.connection())
            .await?)
    }

    /// Inserts `row` and returns it as stored, with its new key. The key
    /// field of `row` is ignored.
    pub async fn insert<T: Entity>(&mut self, row: T) -> Result<T> {
        let sql = insert_sql::<T>();
        let stored = row
            .bind_columns(sqlx::query_as::<_, T>(&sql))
            .fetch_one(self.connection())
            .await?;
        Ok(stored)
    }

    /// Replaces every column of the row with `row.id()`.
    pub async fn update<T: Entity>(&mut self, row: &T) -> Result<T> {
        let id = row.id();
        let sql = update_sql::<T>();
        row.bind_columns(sqlx::query_as::<_, T>(&sql))
            .bind(id)
            .fetch_optional(self.connection())
            .await?
            .ok_or(Error::NotFound {
                entity: T::NAME,
                id,
            })
    }

    /// Deletes the row with `id` and returns it.
    pub async fn delete<T: Entity>(&mut self, id: i64) -> Result<T> {
        let sql = format!("DELETE FROM {} WHERE {} = ? RETURNING *", T::TABLE, T::KEY);
        sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(self.connection())
            .await?
            .ok_or(Error::NotFound {
                entity: T::NAME,
                id,
            })
    }
}
