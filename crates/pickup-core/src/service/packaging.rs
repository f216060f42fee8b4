use super::{ServiceContext, Settlement, non_empty};
use crate::{
    Error, Result,
    cache::keys,
    model::PackagingOption,
    notify::{ChangeEvent, Operation},
    store::{IsolationLevel, Repository},
};

#[derive(Clone)]
pub struct PackagingService {
    ctx: ServiceContext,
    packaging: Repository<PackagingOption>,
}

impl PackagingService {
    pub fn new(ctx: ServiceContext) -> Self {
        let packaging = Repository::new(ctx.transactions.clone());
        Self { ctx, packaging }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_packaging(
        &self,
        kind: &str,
        cost: f64,
        max_weight: f64,
    ) -> Result<PackagingOption> {
        let option = validated(PackagingOption {
            packaging_id: 0,
            kind: non_empty("packaging type", kind)?,
            cost,
            max_weight,
        })?;
        self.ctx
            .execute(
                Operation::Create,
                0,
                IsolationLevel::ReadCommitted,
                format!("create packaging {}", option.kind),
                move |tx| Box::pin(async move { tx.insert(option).await }),
                |option: &PackagingOption| {
                    Settlement::new(
                        packaging_keys(option.packaging_id),
                        ChangeEvent::new(
                            Operation::Create,
                            option.packaging_id,
                            format!("Packaging {} created", option.packaging_id),
                        ),
                    )
                },
            )
            .await
    }

    pub async fn get_packaging(&self, packaging_id: i64) -> Result<PackagingOption> {
        self.ctx
            .cache
            .read_through(&keys::packaging(packaging_id), || {
                self.packaging.get(packaging_id)
            })
            .await
    }

    pub async fn get_all_packaging(&self) -> Result<Vec<PackagingOption>> {
        self.ctx
            .cache
            .read_through(keys::ALL_PACKAGING, || self.packaging.list())
            .await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn update_packaging(&self, option: PackagingOption) -> Result<PackagingOption> {
        let packaging_id = option.packaging_id;
        let option = validated(PackagingOption {
            kind: non_empty("packaging type", &option.kind)?,
            ..option
        })?;
        self.ctx
            .execute(
                Operation::Update,
                packaging_id,
                IsolationLevel::ReadCommitted,
                format!("update packaging {packaging_id}"),
                move |tx| Box::pin(async move { tx.update(&option).await }),
                move |_: &PackagingOption| {
                    Settlement::new(
                        packaging_keys(packaging_id),
                        ChangeEvent::new(
                            Operation::Update,
                            packaging_id,
                            format!("Packaging {packaging_id} updated"),
                        ),
                    )
                },
            )
            .await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_packaging(&self, packaging_id: i64) -> Result<()> {
        self.ctx
            .execute(
                Operation::Delete,
                packaging_id,
                IsolationLevel::Serializable,
                format!("delete packaging {packaging_id}"),
                move |tx| Box::pin(async move { tx.delete::<PackagingOption>(packaging_id).await }),
                move |_: &PackagingOption| {
                    Settlement::new(
                        packaging_keys(packaging_id),
                        ChangeEvent::new(
                            Operation::Delete,
                            packaging_id,
                            format!("Packaging {packaging_id} deleted"),
                        ),
                    )
                },
            )
            .await
            .map(|_| ())
    }

    pub async fn packaging_exists(&self, packaging_id: i64) -> Result<bool> {
        self.packaging.exists(packaging_id).await
    }

    pub async fn packaging_by_type(&self, kind: &str) -> Result<PackagingOption> {
        self.packaging
            .by_kind(kind)
            .await?
            .ok_or_else(|| Error::NameNotFound {
                entity: "packaging",
                name: kind.to_string(),
            })
    }
}

fn validated(option: PackagingOption) -> Result<PackagingOption> {
    if !(option.cost >= 0.0 && option.max_weight >= 0.0) {
        return Err(Error::InvalidRequest {
            reason: format!(
                "packaging cost {} and max weight {} must be non-negative",
                option.cost, option.max_weight
            ),
        });
    }
    Ok(option)
}

fn packaging_keys(packaging_id: i64) -> Vec<String> {
    vec![keys::packaging(packaging_id), keys::ALL_PACKAGING.to_string()]
}
