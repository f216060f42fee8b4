use super::{ServiceContext, Settlement, require_named};
use crate::{
    Error, Result,
    cache::keys,
    metrics,
    model::{Order, Return, ReturnReason, Status, reason, status},
    notify::{ChangeEvent, Operation},
    store::{IsolationLevel, Repository},
};
use chrono::{Duration, Utc};

/// How long after issue a customer may still return an order.
pub const RETURN_WINDOW: Duration = Duration::hours(48);

#[derive(Clone)]
pub struct ReturnService {
    ctx: ServiceContext,
    returns: Repository<Return>,
}

impl ReturnService {
    pub fn new(ctx: ServiceContext) -> Self {
        let returns = Repository::new(ctx.transactions.clone());
        Self { ctx, returns }
    }

    /// Takes an issued order back from its customer.
    ///
    /// The return copies the order's costs and packaging, and the order moves
    /// to the return status in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::NotIssued`] if the order was never issued.
    /// - [`Error::ReturnWindowClosed`] if it was issued more than
    ///   [`RETURN_WINDOW`] ago.
    /// - [`Error::ConstraintViolation`] if the order already has a return.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_return(&self, order_id: i64) -> Result<Return> {
        let counters = self.ctx.metrics.clone();
        self.ctx
            .execute(
                Operation::CreateReturn,
                order_id,
                IsolationLevel::RepeatableRead,
                format!("create return for order {order_id}"),
                move |tx| {
                    Box::pin(async move {
                        let mut order = tx.require::<Order>(order_id).await?;
                        let issued_at = order.issue_date.ok_or(Error::NotIssued { order_id })?;
                        let now = Utc::now();
                        if now - issued_at > RETURN_WINDOW {
                            return Err(Error::ReturnWindowClosed { order_id });
                        }
                        let customer =
                            require_named::<ReturnReason>(tx, "reason", reason::CUSTOMER_RETURN)
                                .await?;
                        let returned =
                            require_named::<Status>(tx, "status_name", status::RETURN).await?;

                        let ret = tx
                            .insert(Return::for_order(
                                &order,
                                customer.reason_id,
                                returned.status_id,
                                now,
                            ))
                            .await?;
                        order.status_id = returned.status_id;
                        tx.update(&order).await?;
                        Ok(ret)
                    })
                },
                move |ret: &Return| {
                    counters.return_created(metrics::CREATED);
                    tracing::info!(order_id, return_id = ret.return_id, "return created");
                    Settlement::new(
                        return_and_order_keys(order_id, ret.user_id),
                        ChangeEvent::new(
                            Operation::CreateReturn,
                            order_id,
                            format!("Return created for order {order_id}"),
                        ),
                    )
                },
            )
            .await
    }

    pub async fn get_return_by_order(&self, order_id: i64) -> Result<Return> {
        self.ctx
            .cache
            .read_through(&keys::order_return(order_id), || async move {
                self.returns
                    .by_order(order_id)
                    .await?
                    .ok_or(Error::NotFound {
                        entity: "return for order",
                        id: order_id,
                    })
            })
            .await
    }

    pub async fn get_returns(&self) -> Result<Vec<Return>> {
        self.ctx
            .cache
            .read_through(keys::ALL_RETURNS, || self.returns.list())
            .await
    }

    pub async fn get_returns_by_user(&self, user_id: i64) -> Result<Vec<Return>> {
        self.ctx
            .cache
            .read_through(&keys::user_returns(user_id), || {
                self.returns.by_user(user_id)
            })
            .await
    }

    /// Replaces every field of the stored return with `ret`.
    #[tracing::instrument(level = "debug", skip(self, ret), fields(return_id = ret.return_id))]
    pub async fn update_return(&self, ret: Return) -> Result<Return> {
        let return_id = ret.return_id;
        self.ctx
            .execute(
                Operation::UpdateReturn,
                ret.order_id,
                IsolationLevel::ReadCommitted,
                format!("update return {return_id}"),
                move |tx| {
                    Box::pin(async move {
                        let previous = tx.require::<Return>(return_id).await?;
                        let ret = tx.update(&ret).await?;
                        Ok((previous, ret))
                    })
                },
                |(previous, ret): &(Return, Return)| {
                    let mut stale = keys::return_keys(ret.order_id, ret.user_id);
                    if (previous.order_id, previous.user_id) != (ret.order_id, ret.user_id) {
                        stale.extend(keys::return_keys(previous.order_id, previous.user_id));
                    }
                    Settlement::new(
                        stale,
                        ChangeEvent::new(
                            Operation::UpdateReturn,
                            ret.order_id,
                            format!("Return updated for order {}", ret.order_id),
                        ),
                    )
                },
            )
            .await
            .map(|(_, ret)| ret)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_return(&self, return_id: i64) -> Result<Return> {
        self.ctx
            .execute(
                Operation::DeleteReturn,
                return_id,
                IsolationLevel::Serializable,
                format!("delete return {return_id}"),
                move |tx| Box::pin(async move { tx.delete::<Return>(return_id).await }),
                move |ret: &Return| {
                    Settlement::new(
                        keys::return_keys(ret.order_id, ret.user_id),
                        ChangeEvent::new(
                            Operation::DeleteReturn,
                            ret.order_id,
                            format!("Return {return_id} deleted"),
                        ),
                    )
                },
            )
            .await
    }

    /// Hands the return of `order_id` over to the courier. The status is
    /// terminal.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn process_return(&self, order_id: i64) -> Result<Return> {
        self.ctx
            .execute(
                Operation::ProcessReturn,
                order_id,
                IsolationLevel::RepeatableRead,
                format!("process return for order {order_id}"),
                move |tx| {
                    Box::pin(async move {
                        let mut ret = tx
                            .find_by::<Return, _>("order_id", order_id)
                            .await?
                            .ok_or(Error::NotFound {
                                entity: "return for order",
                                id: order_id,
                            })?;
                        let courier = require_named::<Status>(
                            tx,
                            "status_name",
                            status::HANDED_TO_COURIER,
                        )
                        .await?;
                        if ret.status_id == courier.status_id {
                            return Err(Error::InvalidRequest {
                                reason: format!(
                                    "return for order {order_id} is already with the courier"
                                ),
                            });
                        }
                        ret.status_id = courier.status_id;
                        tx.update(&ret).await
                    })
                },
                move |ret: &Return| {
                    Settlement::new(
                        keys::return_keys(order_id, ret.user_id),
                        ChangeEvent::new(
                            Operation::ProcessReturn,
                            order_id,
                            format!("Return for order {order_id} handed to courier"),
                        ),
                    )
                },
            )
            .await
    }
}

fn return_and_order_keys(order_id: i64, user_id: i64) -> Vec<String> {
    let mut keys = keys::return_keys(order_id, user_id);
    keys.extend(keys::order_keys(order_id, user_id));
    keys
}
