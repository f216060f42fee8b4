use super::ServiceContext;
use crate::{
    Result,
    cache::keys,
    model::{PackagingOption, ReturnReason, Status, packaging, reason, status},
    store::{IsolationLevel, Transaction},
};

const STATUSES: [&str; 4] = [
    status::CREATED,
    status::ISSUED,
    status::RETURN,
    status::HANDED_TO_COURIER,
];

const REASONS: [&str; 2] = [reason::STORAGE_EXPIRED, reason::CUSTOMER_RETURN];

/// `(type, cost, max_weight)`
const PACKAGING: [(&str, f64, f64); 3] = [
    (packaging::BAG, 5.0, 10.0),
    (packaging::BOX, 20.0, 30.0),
    (packaging::FILM, 1.0, 0.0),
];

/// Installs the statuses, return reasons and packaging options the services
/// rely on. Rows that already exist by name are left untouched.
///
/// Returns the number of rows inserted.
pub async fn seed_reference_data(ctx: &ServiceContext) -> Result<usize> {
    let inserted = ctx
        .transactions
        .run(
            IsolationLevel::Serializable,
            "seed reference data",
            |tx| Box::pin(install(tx)),
        )
        .await?;

    if inserted > 0 {
        ctx.cache
            .invalidate(&[
                keys::ALL_STATUSES.to_string(),
                keys::ALL_REASONS.to_string(),
                keys::ALL_PACKAGING.to_string(),
            ])
            .await;
    }
    tracing::info!(inserted, "reference data seeded");
    Ok(inserted)
}

async fn install(tx: &mut Transaction) -> Result<usize> {
    let mut inserted = 0;

    for name in STATUSES {
        if tx
            .find_by::<Status, _>("status_name", name.to_string())
            .await?
            .is_none()
        {
            tx.insert(Status {
                status_id: 0,
                status_name: name.to_string(),
            })
            .await?;
            inserted += 1;
        }
    }

    for text in REASONS {
        if tx
            .find_by::<ReturnReason, _>("reason", text.to_string())
            .await?
            .is_none()
        {
            tx.insert(ReturnReason {
                reason_id: 0,
                reason: text.to_string(),
            })
            .await?;
            inserted += 1;
        }
    }

    for (kind, cost, max_weight) in PACKAGING {
        if tx
            .find_by::<PackagingOption, _>("type", kind.to_string())
            .await?
            .is_none()
        {
            tx.insert(PackagingOption {
                packaging_id: 0,
                kind: kind.to_string(),
                cost,
                max_weight,
            })
            .await?;
            inserted += 1;
        }
    }

    Ok(inserted)
}
