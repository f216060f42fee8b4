use super::{ServiceContext, Settlement, require_named};
use crate::{
    Error, Result,
    cache::keys,
    model::{NewOrder, Order, PackagingOption, Status, User, packaging, status},
    notify::{ChangeEvent, Operation},
    store::{IsolationLevel, Repository},
};
use chrono::Utc;

/// Surcharge for wrapping an order in film on top of its packaging.
pub const FILM_SURCHARGE: f64 = 1.0;

#[derive(Clone)]
pub struct OrderService {
    ctx: ServiceContext,
    orders: Repository<Order>,
}

impl OrderService {
    pub fn new(ctx: ServiceContext) -> Self {
        let orders = Repository::new(ctx.transactions.clone());
        Self { ctx, orders }
    }

    /// Accepts a new order into storage.
    ///
    /// The packaging cost comes from the chosen packaging option plus
    /// [`FILM_SURCHARGE`] when `with_film` is set. Film has no weight limit.
    ///
    /// # Errors
    ///
    /// - [`Error::ExpirationInPast`] if the expiration date has passed.
    /// - [`Error::WeightExceeded`] if the packaging cannot carry the weight.
    /// - [`Error::NotFound`] if the user or packaging does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_order(&self, new: NewOrder) -> Result<Order> {
        if !(new.weight > 0.0 && new.base_cost >= 0.0) {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "weight {} must be positive and base cost {} non-negative",
                    new.weight, new.base_cost
                ),
            });
        }

        let user_id = new.user_id;
        self.ctx
            .execute(
                Operation::Create,
                0,
                IsolationLevel::ReadCommitted,
                format!("create order for user {user_id}"),
                move |tx| {
                    Box::pin(async move {
                        let now = Utc::now();
                        if new.expiration_date < now {
                            return Err(Error::ExpirationInPast);
                        }
                        tx.require::<User>(new.user_id).await?;
                        let option = tx.require::<PackagingOption>(new.packaging_id).await?;
                        if option.kind != packaging::FILM && new.weight > option.max_weight {
                            return Err(Error::WeightExceeded {
                                weight: new.weight,
                                max_weight: option.max_weight,
                            });
                        }
                        let created =
                            require_named::<Status>(tx, "status_name", status::CREATED).await?;

                        let packaging_cost = if new.with_film {
                            option.cost + FILM_SURCHARGE
                        } else {
                            option.cost
                        };
                        tx.insert(Order {
                            order_id: 0,
                            user_id: new.user_id,
                            acceptance_date: now,
                            expiration_date: new.expiration_date,
                            weight: new.weight,
                            base_cost: new.base_cost,
                            packaging_cost,
                            total_cost: new.base_cost + packaging_cost,
                            packaging_id: option.packaging_id,
                            status_id: created.status_id,
                            issue_date: None,
                            with_film: new.with_film,
                        })
                        .await
                    })
                },
                |order: &Order| {
                    tracing::info!(order_id = order.order_id, user_id = order.user_id, "order created");
                    Settlement::new(
                        keys::order_keys(order.order_id, order.user_id),
                        ChangeEvent::new(
                            Operation::Create,
                            order.order_id,
                            format!("Order {} created", order.order_id),
                        ),
                    )
                },
            )
            .await
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Order> {
        self.ctx
            .cache
            .read_through(&keys::order(order_id), || self.orders.get(order_id))
            .await
    }

    pub async fn get_orders(&self) -> Result<Vec<Order>> {
        self.ctx
            .cache
            .read_through(keys::ALL_ORDERS, || self.orders.list())
            .await
    }

    pub async fn get_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        self.ctx
            .cache
            .read_through(&keys::user_orders(user_id), || {
                self.orders.by_user(user_id)
            })
            .await
    }

    /// Replaces every field of the stored order with `order`.
    #[tracing::instrument(level = "debug", skip(self, order), fields(order_id = order.order_id))]
    pub async fn update_order(&self, order: Order) -> Result<Order> {
        let order_id = order.order_id;
        self.ctx
            .execute(
                Operation::Update,
                order_id,
                IsolationLevel::ReadCommitted,
                format!("update order {order_id}"),
                move |tx| {
                    Box::pin(async move {
                        let previous = tx.require::<Order>(order_id).await?;
                        let order = tx.update(&order).await?;
                        Ok((previous, order))
                    })
                },
                move |(previous, order): &(Order, Order)| {
                    let mut stale = keys::order_keys(order_id, order.user_id);
                    if previous.user_id != order.user_id {
                        stale.push(keys::user_orders(previous.user_id));
                    }
                    Settlement::new(
                        stale,
                        ChangeEvent::new(
                            Operation::Update,
                            order_id,
                            format!("Order {order_id} updated"),
                        ),
                    )
                },
            )
            .await
            .map(|(_, order)| order)
    }

    /// Deletes an order that has no return.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_order(&self, order_id: i64) -> Result<Order> {
        self.ctx
            .execute(
                Operation::Delete,
                order_id,
                IsolationLevel::Serializable,
                format!("delete order {order_id}"),
                move |tx| Box::pin(async move { tx.delete::<Order>(order_id).await }),
                move |order: &Order| {
                    Settlement::new(
                        keys::order_keys(order_id, order.user_id),
                        ChangeEvent::new(
                            Operation::Delete,
                            order_id,
                            format!("Order {order_id} deleted"),
                        ),
                    )
                },
            )
            .await
    }

    /// Hands an order to its customer.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyIssued`] if the order was issued before; the stored
    ///   issue date is left as it was.
    /// - [`Error::NotInStorage`] if the order is no longer waiting for pickup,
    ///   e.g. the sweep already turned it into a return.
    /// - [`Error::StorageExpired`] if the expiration day is before today.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn issue_order(&self, order_id: i64) -> Result<Order> {
        let metrics = self.ctx.metrics.clone();
        // A concurrent second issue must fail to commit.
        self.ctx
            .execute(
                Operation::Issue,
                order_id,
                IsolationLevel::RepeatableRead,
                format!("issue order {order_id}"),
                move |tx| {
                    Box::pin(async move {
                        let mut order = tx.require::<Order>(order_id).await?;
                        if order.issue_date.is_some() {
                            return Err(Error::AlreadyIssued { order_id });
                        }
                        let created =
                            require_named::<Status>(tx, "status_name", status::CREATED).await?;
                        if order.status_id != created.status_id {
                            return Err(Error::NotInStorage { order_id });
                        }
                        let now = Utc::now();
                        if order.expiration_date.date_naive() < now.date_naive() {
                            return Err(Error::StorageExpired { order_id });
                        }
                        let issued =
                            require_named::<Status>(tx, "status_name", status::ISSUED).await?;

                        order.issue_date = Some(now);
                        order.status_id = issued.status_id;
                        tx.update(&order).await
                    })
                },
                move |order: &Order| {
                    metrics.order_issued();
                    tracing::info!(order_id, user_id = order.user_id, "order issued");
                    Settlement::new(
                        keys::order_keys(order_id, order.user_id),
                        ChangeEvent::new(
                            Operation::Issue,
                            order_id,
                            format!("Order {order_id} issued"),
                        ),
                    )
                },
            )
            .await
    }
}
