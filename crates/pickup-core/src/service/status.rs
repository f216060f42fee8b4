use super::{ServiceContext, Settlement, non_empty};
use crate::{
    Error, Result,
    cache::keys,
    model::Status,
    notify::{ChangeEvent, Operation},
    store::{IsolationLevel, Repository},
};

#[derive(Clone)]
pub struct StatusService {
    ctx: ServiceContext,
    statuses: Repository<Status>,
}

impl StatusService {
    pub fn new(ctx: ServiceContext) -> Self {
        let statuses = Repository::new(ctx.transactions.clone());
        Self { ctx, statuses }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_status(&self, name: &str) -> Result<Status> {
        let status_name = non_empty("status name", name)?;
        self.ctx
            .execute(
                Operation::Create,
                0,
                IsolationLevel::ReadCommitted,
                format!("create status {status_name}"),
                move |tx| {
                    Box::pin(async move {
                        tx.insert(Status {
                            status_id: 0,
                            status_name,
                        })
                        .await
                    })
                },
                |status: &Status| {
                    Settlement::new(
                        status_keys(status.status_id),
                        ChangeEvent::new(
                            Operation::Create,
                            status.status_id,
                            format!("Status {} created", status.status_id),
                        ),
                    )
                },
            )
            .await
    }

    pub async fn get_status(&self, status_id: i64) -> Result<Status> {
        self.ctx
            .cache
            .read_through(&keys::status(status_id), || self.statuses.get(status_id))
            .await
    }

    pub async fn get_statuses(&self) -> Result<Vec<Status>> {
        self.ctx
            .cache
            .read_through(keys::ALL_STATUSES, || self.statuses.list())
            .await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn update_status(&self, status_id: i64, name: &str) -> Result<Status> {
        let status_name = non_empty("status name", name)?;
        self.ctx
            .execute(
                Operation::Update,
                status_id,
                IsolationLevel::ReadCommitted,
                format!("update status {status_id}"),
                move |tx| {
                    Box::pin(async move {
                        tx.update(&Status {
                            status_id,
                            status_name,
                        })
                        .await
                    })
                },
                move |_: &Status| {
                    Settlement::new(
                        status_keys(status_id),
                        ChangeEvent::new(
                            Operation::Update,
                            status_id,
                            format!("Status {status_id} updated"),
                        ),
                    )
                },
            )
            .await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_status(&self, status_id: i64) -> Result<()> {
        self.ctx
            .execute(
                Operation::Delete,
                status_id,
                IsolationLevel::Serializable,
                format!("delete status {status_id}"),
                move |tx| Box::pin(async move { tx.delete::<Status>(status_id).await }),
                move |_: &Status| {
                    Settlement::new(
                        status_keys(status_id),
                        ChangeEvent::new(
                            Operation::Delete,
                            status_id,
                            format!("Status {status_id} deleted"),
                        ),
                    )
                },
            )
            .await
            .map(|_| ())
    }

    pub async fn status_exists(&self, status_id: i64) -> Result<bool> {
        self.statuses.exists(status_id).await
    }

    pub async fn status_id_by_name(&self, name: &str) -> Result<i64> {
        self.statuses
            .by_name(name)
            .await?
            .map(|status| status.status_id)
            .ok_or_else(|| Error::NameNotFound {
                entity: "status",
                name: name.to_string(),
            })
    }

    pub async fn status_name(&self, status_id: i64) -> Result<String> {
        Ok(self.get_status(status_id).await?.status_name)
    }
}

fn status_keys(status_id: i64) -> Vec<String> {
    vec![keys::status(status_id), keys::ALL_STATUSES.to_string()]
}
