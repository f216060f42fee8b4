//! Table mapping for the domain records.
//!
//! The DDL lives in `migrations/`. Integrity is enforced by SQLite itself:
//! foreign keys restrict deletes of referenced rows, and names, usernames and
//! the order of a return are unique.

use crate::model::{Order, PackagingOption, Return, ReturnReason, Status, User};
use sqlx::{FromRow, Sqlite, query::QueryAs, sqlite::{SqliteArguments, SqliteRow}};

/// A `query_as` statement producing `T`.
pub type EntityQuery<'q, T> = QueryAs<'q, Sqlite, T, SqliteArguments<'q>>;

/// A record stored in its own table under an integer surrogate key.
pub trait Entity: for<'r> FromRow<'r, SqliteRow> + Clone + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    /// Singular name used in errors.
    const NAME: &'static str;
    /// Primary key column, assigned by the database on insert.
    const KEY: &'static str;
    /// Every other column, in the order [`Entity::bind_columns`] binds them.
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> i64;

    fn bind_columns<'q>(&self, query: EntityQuery<'q, Self>) -> EntityQuery<'q, Self>;
}

impl Entity for Order {
    const TABLE: &'static str = "orders";
    const NAME: &'static str = "order";
    const KEY: &'static str = "order_id";
    const COLUMNS: &'static [&'static str] = &[
        "user_id",
        "acceptance_date",
        "expiration_date",
        "weight",
        "base_cost",
        "packaging_cost",
        "total_cost",
        "packaging_id",
        "status_id",
        "issue_date",
        "with_film",
    ];

    fn id(&self) -> i64 {
        self.order_id
    }

    fn bind_columns<'q>(&self, query: EntityQuery<'q, Self>) -> EntityQuery<'q, Self> {
        query
            .bind(self.user_id)
            .bind(self.acceptance_date)
            .bind(self.expiration_date)
            .bind(self.weight)
            .bind(self.base_cost)
            .bind(self.packaging_cost)
            .bind(self.total_cost)
            .bind(self.packaging_id)
            .bind(self.status_id)
            .bind(self.issue_date)
            .bind(self.with_film)
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const NAME: &'static str = "user";
    const KEY: &'static str = "user_id";
    const COLUMNS: &'static [&'static str] = &["username", "created_at"];

    fn id(&self) -> i64 {
        self.user_id
    }

    fn bind_columns<'q>(&self, query: EntityQuery<'q, Self>) -> EntityQuery<'q, Self> {
        query.bind(self.username.clone()).bind(self.created_at)
    }
}

impl Entity for PackagingOption {
    const TABLE: &'static str = "packaging";
    const NAME: &'static str = "packaging";
    const KEY: &'static str = "packaging_id";
    const COLUMNS: &'static [&'static str] = &["type", "cost", "max_weight"];

    fn id(&self) -> i64 {
        self.packaging_id
    }

    fn bind_columns<'q>(&self, query: EntityQuery<'q, Self>) -> EntityQuery<'q, Self> {
        query
            .bind(self.kind.clone())
            .bind(self.cost)
            .bind(self.max_weight)
    }
}

impl Entity for Return {
    const TABLE: &'static str = "returns";
    const NAME: &'static str = "return";
    const KEY: &'static str = "return_id";
    const COLUMNS: &'static [&'static str] = &[
        "order_id",
        "user_id",
        "return_date",
        "reason_id",
        "base_cost",
        "packaging_cost",
        "packaging_id",
        "total_cost",
        "status_id",
    ];

    fn id(&self) -> i64 {
        self.return_id
    }

    fn bind_columns<'q>(&self, query: EntityQuery<'q, Self>) -> EntityQuery<'q, Self> {
        query
            .bind(self.order_id)
            .bind(self.user_id)
            .bind(self.return_date)
            .bind(self.reason_id)
            .bind(self.base_cost)
            .bind(self.packaging_cost)
            .bind(self.packaging_id)
            .bind(self.total_cost)
            .bind(self.status_id)
    }
}

impl Entity for ReturnReason {
    const TABLE: &'static str = "return_reasons";
    const NAME: &'static str = "return reason";
    const KEY: &'static str = "reason_id";
    const COLUMNS: &'static [&'static str] = &["reason"];

    fn id(&self) -> i64 {
        self.reason_id
    }

    fn bind_columns<'q>(&self, query: EntityQuery<'q, Self>) -> EntityQuery<'q, Self> {
        query.bind(self.reason.clone())
    }
}

impl Entity for Status {
    const TABLE: &'static str = "statuses";
    const NAME: &'static str = "status";
    const KEY: &'static str = "status_id";
    const COLUMNS: &'static [&'static str] = &["status_name"];

    fn id(&self) -> i64 {
        self.status_id
    }

    fn bind_columns<'q>(&self, query: EntityQuery<'q, Self>) -> EntityQuery<'q, Self> {
        query.bind(self.status_name.clone())
    }
}

/// `INSERT` of every non-key column, returning the stored row.
pub(crate) fn insert_sql<T: Entity>() -> String {
    let placeholders = vec!["?"; T::COLUMNS.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) RETURNING *",
        T::TABLE,
        T::COLUMNS.join(", ")
    )
}

/// `UPDATE` of every non-key column by key, returning the stored row.
pub(crate) fn update_sql<T: Entity>() -> String {
    let assignments = T::COLUMNS
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {} = ? RETURNING *",
        T::TABLE,
        T::KEY
    )
}
