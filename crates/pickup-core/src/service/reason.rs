use super::{ServiceContext, Settlement, non_empty};
use crate::{
    Error, Result,
    cache::keys,
    model::ReturnReason,
    notify::{ChangeEvent, Operation},
    store::{IsolationLevel, Repository},
};

#[derive(Clone)]
pub struct ReturnReasonService {
    ctx: ServiceContext,
    reasons: Repository<ReturnReason>,
}

impl ReturnReasonService {
    pub fn new(ctx: ServiceContext) -> Self {
        let reasons = Repository::new(ctx.transactions.clone());
        Self { ctx, reasons }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_reason(&self, text: &str) -> Result<ReturnReason> {
        let reason = non_empty("reason", text)?;
        self.ctx
            .execute(
                Operation::Create,
                0,
                IsolationLevel::ReadCommitted,
                format!("create return reason {reason}"),
                move |tx| {
                    Box::pin(async move {
                        tx.insert(ReturnReason {
                            reason_id: 0,
                            reason,
                        })
                        .await
                    })
                },
                |reason: &ReturnReason| {
                    Settlement::new(
                        reason_keys(reason.reason_id),
                        ChangeEvent::new(
                            Operation::Create,
                            reason.reason_id,
                            format!("Return reason {} created", reason.reason_id),
                        ),
                    )
                },
            )
            .await
    }

    pub async fn get_reason(&self, reason_id: i64) -> Result<ReturnReason> {
        self.ctx
            .cache
            .read_through(&keys::reason(reason_id), || self.reasons.get(reason_id))
            .await
    }

    pub async fn get_reasons(&self) -> Result<Vec<ReturnReason>> {
        self.ctx
            .cache
            .read_through(keys::ALL_REASONS, || self.reasons.list())
            .await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn update_reason(&self, reason_id: i64, text: &str) -> Result<ReturnReason> {
        let reason = non_empty("reason", text)?;
        self.ctx
            .execute(
                Operation::Update,
                reason_id,
                IsolationLevel::ReadCommitted,
                format!("update return reason {reason_id}"),
                move |tx| {
                    Box::pin(async move { tx.update(&ReturnReason { reason_id, reason }).await })
                },
                move |_: &ReturnReason| {
                    Settlement::new(
                        reason_keys(reason_id),
                        ChangeEvent::new(
                            Operation::Update,
                            reason_id,
                            format!("Return reason {reason_id} updated"),
                        ),
                    )
                },
            )
            .await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_reason(&self, reason_id: i64) -> Result<()> {
        self.ctx
            .execute(
                Operation::Delete,
                reason_id,
                IsolationLevel::Serializable,
                format!("delete return reason {reason_id}"),
                move |tx| Box::pin(async move { tx.delete::<ReturnReason>(reason_id).await }),
                move |_: &ReturnReason| {
                    Settlement::new(
                        reason_keys(reason_id),
                        ChangeEvent::new(
                            Operation::Delete,
                            reason_id,
                            format!("Return reason {reason_id} deleted"),
                        ),
                    )
                },
            )
            .await
            .map(|_| ())
    }

    pub async fn reason_exists(&self, reason_id: i64) -> Result<bool> {
        self.reasons.exists(reason_id).await
    }

    pub async fn reason_id_by_text(&self, text: &str) -> Result<i64> {
        self.reasons
            .by_reason(text)
            .await?
            .map(|reason| reason.reason_id)
            .ok_or_else(|| Error::NameNotFound {
                entity: "return reason",
                name: text.to_string(),
            })
    }
}

fn reason_keys(reason_id: i64) -> Vec<String> {
    vec![keys::reason(reason_id), keys::ALL_REASONS.to_string()]
}
